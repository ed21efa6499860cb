mod rules;
mod scheduler;

pub use rules::{decide_solo, decide_vs, Standing, TieBreak};
pub use scheduler::{
    SchedulerHandle, SettlementFailure, SettlementOutcome, SettlementReport, SettlementScheduler,
};
