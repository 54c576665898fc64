mod answer_questions;
mod finalize;
mod load_resources;
mod score;

pub(crate) use answer_questions::answer_questions;
pub(crate) use finalize::finalize;
pub(crate) use load_resources::load_resources;
pub(crate) use score::score;

use anyhow::Result;
use state_machines::core::GuardError;

use super::state::RunMachine;

fn map_guard_error(event: &str, guard: GuardError) -> anyhow::Error {
    anyhow::anyhow!("invalid run pipeline transition during {event}: {guard:?}")
}

type StageResult<S> = Result<RunMachine<(), S>>;
