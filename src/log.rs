//! The implementation of the `TL_LOG_IR` environment variable.
//!
//! `TL_LOG_IR=<path|->:phase_1,...,phase_n` logs the named IR phases to a
//! file (or stderr for `-`) as compilation passes through them.

use std::{collections::HashSet, env, error::Error, fs::File, io::Write, sync::LazyLock};

#[derive(Eq, Hash, PartialEq)]
pub(crate) enum IRPhase {
    PreOpt,
    PostOpt,
    Asm,
}

impl IRPhase {
    fn from_str(s: &str) -> Result<Self, Box<dyn Error>> {
        match s {
            "jit-pre-opt" => Ok(Self::PreOpt),
            "jit-post-opt" => Ok(Self::PostOpt),
            "jit-asm" => Ok(Self::Asm),
            _ => Err(format!("Invalid TL_LOG_IR value: {s}").into()),
        }
    }
}

static LOG_IR: LazyLock<Option<(String, HashSet<IRPhase>)>> = LazyLock::new(|| {
    if let Ok(x) = env::var("TL_LOG_IR") {
        match x.split(':').collect::<Vec<_>>().as_slice() {
            [p, phases] => {
                let mut log_phases = HashSet::new();
                for x in phases.split(',') {
                    log_phases.insert(IRPhase::from_str(x).unwrap());
                }
                Some((p.to_string(), log_phases))
            }
            _ => panic!("TL_LOG_IR must be of the format '<path|->:phase_1,...,phase_n'"),
        }
    } else {
        None
    }
});

pub(crate) fn should_log_ir(phase: IRPhase) -> bool {
    if let Some(true) = LOG_IR.as_ref().map(|(_, phases)| phases.contains(&phase)) {
        return true;
    }
    false
}

pub(crate) fn log_ir(s: &str) {
    match LOG_IR.as_ref().map(|(p, _)| p.as_str()) {
        Some("-") => eprintln!("{}", s),
        Some(x) => {
            File::options()
                .append(true)
                .open(x)
                .map(|mut x| x.write(s.as_bytes()))
                .ok();
        }
        None => (),
    }
}
