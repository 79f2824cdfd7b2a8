use super::errors::{business_rule_violation, module_busy, GuardResult};
use super::states::ModuleState;
use crate::module::commands::{CommandStage, ModuleKind};

/// Trait for implementing state transition guards
pub trait StateGuard<T> {
    /// Check if a transition is allowed
    fn check(&self, entity: &T) -> GuardResult<()>;

    /// Get a description of this guard for logging
    fn description(&self) -> &'static str;
}

/// What a guard sees when an action is about to start
#[derive(Debug, Clone, Copy)]
pub struct StartContext<'a> {
    pub state: ModuleState,
    pub kind: ModuleKind,
    pub command: &'a str,
}

/// Work may only begin from IDLE
pub struct ModuleIdleGuard;

impl StateGuard<StartContext<'_>> for ModuleIdleGuard {
    fn check(&self, ctx: &StartContext<'_>) -> GuardResult<()> {
        if ctx.state.accepts_work() {
            Ok(())
        } else {
            Err(module_busy(format!(
                "cannot start {} while {}",
                ctx.command, ctx.state
            )))
        }
    }

    fn description(&self) -> &'static str {
        "Module must be idle to start an action"
    }
}

/// The command must belong to the module's command set
pub struct SupportedCommandGuard;

impl StateGuard<StartContext<'_>> for SupportedCommandGuard {
    fn check(&self, ctx: &StartContext<'_>) -> GuardResult<()> {
        if ctx.kind.supports(ctx.command) {
            Ok(())
        } else {
            Err(business_rule_violation(format!(
                "{} does not support {} ({:?} stage)",
                ctx.kind,
                ctx.command,
                CommandStage::of(ctx.command)
            )))
        }
    }

    fn description(&self) -> &'static str {
        "Command must be supported by the module kind"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_descriptions() {
        assert_eq!(
            ModuleIdleGuard.description(),
            "Module must be idle to start an action"
        );
        assert_eq!(
            SupportedCommandGuard.description(),
            "Command must be supported by the module kind"
        );
    }

    #[test]
    fn test_idle_guard() {
        let ctx = StartContext {
            state: ModuleState::Idle,
            kind: ModuleKind::Mill,
            command: "MILL",
        };
        assert!(ModuleIdleGuard.check(&ctx).is_ok());

        let busy = StartContext {
            state: ModuleState::Processing,
            ..ctx
        };
        assert!(ModuleIdleGuard.check(&busy).is_err());
    }

    #[test]
    fn test_supported_command_guard() {
        let ctx = StartContext {
            state: ModuleState::Idle,
            kind: ModuleKind::Drill,
            command: "MILL",
        };
        assert!(SupportedCommandGuard.check(&ctx).is_err());
    }
}
