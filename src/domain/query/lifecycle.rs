/// Host lifecycle events that can trigger revalidation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The process regained foreground focus
    Focus,
    /// The view became visible again
    Visible,
}
