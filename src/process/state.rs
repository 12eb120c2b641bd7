use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a supervised command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmdState {
    /// Can be started (again)
    NotStarted,
    /// Process running
    Started,
    /// Process killed through the control API
    Killed,
    /// Process terminated with an error
    Crashed,
    /// Process terminated without error
    Exited,
}

impl CmdState {
    fn as_u8(self) -> u8 {
        match self {
            CmdState::NotStarted => 0,
            CmdState::Started => 1,
            CmdState::Killed => 2,
            CmdState::Crashed => 3,
            CmdState::Exited => 4,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => CmdState::Started,
            2 => CmdState::Killed,
            3 => CmdState::Crashed,
            4 => CmdState::Exited,
            _ => CmdState::NotStarted,
        }
    }
}

impl fmt::Display for CmdState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CmdState::NotStarted => "not-started",
            CmdState::Started => "started",
            CmdState::Killed => "killed",
            CmdState::Crashed => "crashed",
            CmdState::Exited => "exited",
        };
        f.write_str(name)
    }
}

/// Atomic storage for a [`CmdState`].
///
/// The supervision task and the kill path both write the state, so every
/// write that must not clobber `Killed` goes through [`StateCell::replace_if`].
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: CmdState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub(crate) fn load(&self) -> CmdState {
        CmdState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Unconditionally store `new`, returning the previous state
    pub(crate) fn swap(&self, new: CmdState) -> CmdState {
        CmdState::from_u8(self.0.swap(new.as_u8(), Ordering::AcqRel))
    }

    /// Store `new` only if the current state is `expected`
    pub(crate) fn replace_if(&self, expected: CmdState, new: CmdState) -> bool {
        self.0
            .compare_exchange(
                expected.as_u8(),
                new.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_if_respects_killed() {
        let cell = StateCell::new(CmdState::Started);
        assert!(cell.replace_if(CmdState::Started, CmdState::Killed));
        assert!(!cell.replace_if(CmdState::Started, CmdState::Crashed));
        assert_eq!(cell.load(), CmdState::Killed);
    }

    #[test]
    fn test_swap_returns_previous() {
        let cell = StateCell::new(CmdState::NotStarted);
        assert_eq!(cell.swap(CmdState::Started), CmdState::NotStarted);
        assert_eq!(cell.swap(CmdState::Exited), CmdState::Started);
        assert_eq!(cell.load(), CmdState::Exited);
    }

    #[test]
    fn test_display() {
        assert_eq!(CmdState::NotStarted.to_string(), "not-started");
        assert_eq!(CmdState::Crashed.to_string(), "crashed");
    }
}
