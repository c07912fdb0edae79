//! Stacked scheduling flags with scope guards.
//!
//! Bulk operations suspend graph maintenance or eager recomputation for
//! their duration. Each flag is a stack; a [`ScheduleGuard`] pushes a value
//! and pops it again when dropped, on every exit path.

use std::ops::{Deref, DerefMut};

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleFlag {
    /// Maintain graph edges when the tree changes
    UpdateGraph,
    /// Recompute pending formulas right after each mutation
    RecomputeEagerly,
}

#[derive(Debug, Clone)]
pub struct Schedule {
    update_graph: Vec<bool>,
    recompute_eagerly: Vec<bool>,
}

impl Default for Schedule {
    fn default() -> Self {
        Self::new(true, true)
    }
}

impl Schedule {
    pub fn new(update_graph: bool, recompute_eagerly: bool) -> Self {
        Self {
            update_graph: vec![update_graph],
            recompute_eagerly: vec![recompute_eagerly],
        }
    }

    fn stack(&self, flag: ScheduleFlag) -> &Vec<bool> {
        match flag {
            ScheduleFlag::UpdateGraph => &self.update_graph,
            ScheduleFlag::RecomputeEagerly => &self.recompute_eagerly,
        }
    }

    fn stack_mut(&mut self, flag: ScheduleFlag) -> &mut Vec<bool> {
        match flag {
            ScheduleFlag::UpdateGraph => &mut self.update_graph,
            ScheduleFlag::RecomputeEagerly => &mut self.recompute_eagerly,
        }
    }

    pub fn is_set(&self, flag: ScheduleFlag) -> bool {
        self.stack(flag).last().copied().unwrap_or(true)
    }

    /// Number of active scopes for `flag`.
    pub fn depth(&self, flag: ScheduleFlag) -> usize {
        self.stack(flag).len() - 1
    }

    fn push(&mut self, flag: ScheduleFlag, value: bool) {
        self.stack_mut(flag).push(value);
    }

    fn pop(&mut self, flag: ScheduleFlag) {
        let stack = self.stack_mut(flag);
        if stack.len() > 1 {
            stack.pop();
        } else {
            warn!("unbalanced pop of {:?}", flag);
            debug_assert!(false, "unbalanced schedule pop");
        }
    }
}

/// Anything that owns a [`Schedule`] can hand out scoped flag overrides.
pub trait Scheduled {
    fn schedule(&self) -> &Schedule;
    fn schedule_mut(&mut self) -> &mut Schedule;

    /// Set `flag` to `value` until the returned guard is dropped.
    fn scoped(&mut self, flag: ScheduleFlag, value: bool) -> ScheduleGuard<'_, Self>
    where
        Self: Sized,
    {
        self.schedule_mut().push(flag, value);
        ScheduleGuard { target: self, flag }
    }
}

impl Scheduled for Schedule {
    fn schedule(&self) -> &Schedule {
        self
    }

    fn schedule_mut(&mut self) -> &mut Schedule {
        self
    }
}

/// Restores the previous flag value on drop. Derefs to the guarded owner.
pub struct ScheduleGuard<'a, T: Scheduled> {
    target: &'a mut T,
    flag: ScheduleFlag,
}

impl<T: Scheduled> Deref for ScheduleGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.target
    }
}

impl<T: Scheduled> DerefMut for ScheduleGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.target
    }
}

impl<T: Scheduled> Drop for ScheduleGuard<'_, T> {
    fn drop(&mut self) {
        self.target.schedule_mut().pop(self.flag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_nested_guards_when_dropped_then_restores_each_level() {
        let mut schedule = Schedule::default();
        {
            let mut outer = schedule.scoped(ScheduleFlag::RecomputeEagerly, false);
            assert!(!outer.is_set(ScheduleFlag::RecomputeEagerly));
            {
                let inner = outer.scoped(ScheduleFlag::RecomputeEagerly, true);
                assert!(inner.is_set(ScheduleFlag::RecomputeEagerly));
                assert_eq!(inner.depth(ScheduleFlag::RecomputeEagerly), 2);
            }
            assert!(!outer.is_set(ScheduleFlag::RecomputeEagerly));
            assert!(outer.is_set(ScheduleFlag::UpdateGraph));
        }
        assert!(schedule.is_set(ScheduleFlag::RecomputeEagerly));
        assert_eq!(schedule.depth(ScheduleFlag::RecomputeEagerly), 0);
    }

    #[test]
    fn given_early_return_when_guard_in_scope_then_flag_restored() {
        fn bail(schedule: &mut Schedule) -> Result<(), ()> {
            let guard = schedule.scoped(ScheduleFlag::UpdateGraph, false);
            if !guard.is_set(ScheduleFlag::UpdateGraph) {
                return Err(());
            }
            Ok(())
        }
        let mut schedule = Schedule::new(true, false);
        assert!(bail(&mut schedule).is_err());
        assert!(schedule.is_set(ScheduleFlag::UpdateGraph));
        assert!(!schedule.is_set(ScheduleFlag::RecomputeEagerly));
    }
}
