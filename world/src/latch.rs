use dreamflap_core::Action;

/// Edge-triggered flap input consumed by the next completed step.
///
/// Registering twice before a step still yields a single flap; the latch is
/// not a held key state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlapLatch {
    latched: bool,
}

impl FlapLatch {
    /// Records a flap request.
    pub fn register(&mut self) {
        self.latched = true;
    }

    /// Action the next step will consume, without clearing the latch.
    #[must_use]
    pub fn peek(&self) -> Action {
        if self.latched {
            Action::Flap
        } else {
            Action::Noop
        }
    }

    /// Returns the latched action and clears the latch.
    pub fn take(&mut self) -> Action {
        let action = self.peek();
        self.latched = false;
        action
    }
}
