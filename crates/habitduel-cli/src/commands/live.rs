//! Line-oriented live session.
//!
//! Each stdin line is one action from an authenticated participant:
//!
//! ```json
//! {"challengeId": 1, "userId": 7, "action": "START"}
//! ```
//!
//! Every message broadcast on a touched challenge is printed to stdout as
//! one JSON line, tagged with its challenge id.

use clap::Args;
use habitduel_core::{
    ChallengeId, Clock, Config, LiveEndpoint, Principal, RealtimeBroadcaster, SessionRegistry,
    SystemClock, TimerCoordinator, TimerMessage, UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{open_database, CommandResult};

#[derive(Args)]
pub struct LiveArgs {
    /// Do not echo rejected lines to stderr
    #[arg(long)]
    pub quiet_errors: bool,
}

/// Routing part of an input line; the rest is the live payload.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    challenge_id: ChallengeId,
    user_id: UserId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Broadcast<'a> {
    challenge_id: ChallengeId,
    #[serde(flatten)]
    message: &'a TimerMessage,
}

pub fn run(args: LiveArgs) -> CommandResult {
    let config = Config::load()?;
    let store = Arc::new(open_database(&config)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let coordinator = Arc::new(TimerCoordinator::new(
        store,
        Arc::new(SessionRegistry::new(clock.clone())),
        Arc::new(config.state_machine()),
        clock,
    ));
    let endpoint = LiveEndpoint::new(
        coordinator,
        Arc::new(RealtimeBroadcaster::new(config.realtime.channel_capacity)),
    );

    let mut receivers: BTreeMap<ChallengeId, broadcast::Receiver<TimerMessage>> = BTreeMap::new();
    let stdout = io::stdout();

    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let envelope: Envelope = match serde_json::from_str(&line) {
            Ok(envelope) => envelope,
            Err(e) => {
                if !args.quiet_errors {
                    eprintln!("error: invalid line: {e}");
                }
                continue;
            }
        };

        receivers
            .entry(envelope.challenge_id)
            .or_insert_with(|| endpoint.broadcaster().subscribe(envelope.challenge_id));

        let principal = Principal {
            user_id: envelope.user_id,
        };
        if let Err(e) = endpoint.handle_raw(envelope.challenge_id, principal, &line) {
            warn!(challenge_id = envelope.challenge_id, error = %e, "live action failed");
            if !args.quiet_errors {
                eprintln!("error: {e}");
            }
        }

        let mut out = stdout.lock();
        for (&challenge_id, rx) in receivers.iter_mut() {
            drain(challenge_id, rx, &mut out)?;
        }
        out.flush()?;
    }
    Ok(())
}

fn drain(
    challenge_id: ChallengeId,
    rx: &mut broadcast::Receiver<TimerMessage>,
    out: &mut impl Write,
) -> CommandResult {
    loop {
        match rx.try_recv() {
            Ok(message) => {
                let line = serde_json::to_string(&Broadcast {
                    challenge_id,
                    message: &message,
                })?;
                writeln!(out, "{line}")?;
            }
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                debug!(challenge_id, skipped, "receiver lagged");
            }
            Err(_) => return Ok(()),
        }
    }
}
