use chrono::{NaiveDate, Utc};
use clap::{Subcommand, ValueEnum};
use habitduel_core::error::NotFoundError;
use habitduel_core::storage::{ChallengeStore, MemberStore, ProgressStore};
use habitduel_core::{ChallengeId, ChallengeMode, Config, NewChallenge, UserId};

use super::{open_database, CommandResult};

#[derive(Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Solo,
    Vs,
}

impl From<ModeArg> for ChallengeMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Solo => ChallengeMode::Solo,
            ModeArg::Vs => ChallengeMode::Vs,
        }
    }
}

#[derive(Subcommand)]
pub enum ChallengeAction {
    /// Create a challenge with its members and weekly records
    Create {
        #[arg(long, value_enum, default_value = "solo")]
        mode: ModeArg,
        /// Host user id
        #[arg(long)]
        host: UserId,
        /// Opponent user id (VS only)
        #[arg(long)]
        member: Option<UserId>,
        /// Duration in weeks
        #[arg(long, default_value = "4")]
        weeks: u32,
        /// Weekly target in seconds
        #[arg(long)]
        target_secs: u64,
        /// Start date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        started: Option<NaiveDate>,
    },
    /// Print a challenge with its members and weeks as JSON
    Show {
        /// Challenge id
        id: ChallengeId,
    },
}

pub fn run(action: ChallengeAction) -> CommandResult {
    let config = Config::load()?;
    let db = open_database(&config)?;

    match action {
        ChallengeAction::Create {
            mode,
            host,
            member,
            weeks,
            target_secs,
            started,
        } => {
            let challenge = db.create_challenge(&NewChallenge {
                mode: mode.into(),
                started_at: started.unwrap_or_else(|| Utc::now().date_naive()),
                duration_weeks: weeks,
                host_id: host,
                member_id: member,
                target_time_seconds: target_secs,
            })?;
            println!("{}", serde_json::to_string_pretty(&challenge)?);
        }
        ChallengeAction::Show { id } => {
            let challenge = db
                .find_challenge(id)?
                .ok_or(NotFoundError::Challenge(id))?;
            let members = db.list_members(id)?;
            let mut weeks = Vec::new();
            for member in &members {
                weeks.extend(db.list_progress(id, member.user_id)?);
            }
            let json = serde_json::json!({
                "challenge": challenge,
                "members": members,
                "weeks": weeks,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }
    Ok(())
}
