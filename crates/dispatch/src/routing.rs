//! Signature correction and route selection.

use exertion_core::{Access, Exertion, Signature, Strategy, UnitKind, SERVICE_OP, SPACER};

/// Where a unit is sent.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Executed in this process
    Local,
    /// Handed to the workspace queue
    Space,
    /// Invoked on an executor found in the directory
    Remote(Signature),
}

/// Signature a composite must be dispatched with under `strategy`.
///
/// PULL composites target the workspace (`Spacer#service`, any provider);
/// PUSH composites still targeting the workspace go back to direct dispatch.
/// Leaf signatures are never rewritten.
pub fn corrected_signature(original: &Signature, strategy: &Strategy, kind: UnitKind) -> Signature {
    let direct = match kind {
        UnitKind::Job => Signature::jobber(),
        UnitKind::Block => Signature::concatenator(),
        UnitKind::Task | UnitKind::Alternative => return original.clone(),
    };

    match strategy.access {
        Access::Pull if !original.is_spacer() => Signature::new(SERVICE_OP, SPACER)
            .with_kind(original.kind),
        Access::Push if original.is_spacer() => direct.with_kind(original.kind),
        _ => original.clone(),
    }
}

/// Route of a unit whose signature has already been corrected.
pub fn route(unit: &Exertion) -> Route {
    let Some(signature) = unit.signature() else {
        return Route::Local;
    };
    if signature.is_spacer() || (!unit.is_composite() && unit.strategy().access == Access::Pull) {
        Route::Space
    } else if signature.is_local() {
        Route::Local
    } else {
        Route::Remote(signature.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exertion_core::{Job, Task, JOBBER};

    #[test]
    fn test_pull_composite_goes_to_space() {
        let pull = Strategy::new().with_access(Access::Pull);
        let fixed = corrected_signature(&Signature::jobber(), &pull, UnitKind::Job);
        assert!(fixed.is_spacer());
        assert_eq!(fixed.operation, SERVICE_OP);
        assert_eq!(fixed.provider, None);

        // already targeting the workspace
        let again = corrected_signature(&fixed, &pull, UnitKind::Job);
        assert_eq!(again, fixed);
    }

    #[test]
    fn test_push_composite_leaves_space() {
        let push = Strategy::new();
        let spacer = Signature::new(SERVICE_OP, SPACER);
        let fixed = corrected_signature(&spacer, &push, UnitKind::Job);
        assert_eq!(fixed.capability, JOBBER);
        assert!(fixed.is_local());

        let block = corrected_signature(&spacer, &push, UnitKind::Block);
        assert_eq!(block, Signature::concatenator());
    }

    #[test]
    fn test_task_signature_untouched() {
        let pull = Strategy::new().with_access(Access::Pull);
        let sig = Signature::new("add", "Adder");
        assert_eq!(corrected_signature(&sig, &pull, UnitKind::Task), sig);
    }

    #[test]
    fn test_routes() {
        let local: Exertion = Task::new("t", Signature::local("add", "Adder")).into();
        assert_eq!(route(&local), Route::Local);

        let remote: Exertion = Task::new("t", Signature::new("add", "Adder")).into();
        assert!(matches!(route(&remote), Route::Remote(_)));

        let pulled: Exertion = Task::new("t", Signature::new("add", "Adder"))
            .with_strategy(Strategy::new().with_access(Access::Pull))
            .into();
        assert_eq!(route(&pulled), Route::Space);

        let job: Exertion = Job::new("j").into();
        assert_eq!(route(&job), Route::Local);
    }
}
