//! Return type for methods which necessitate draining an outbound queue.


/// Denotes that calling a method must be followed by draining the callee's outbound queue.
///
/// `World::tick` queues the messages it wants sent to the server rather than sending them
/// itself. Returning `MustDrain` from it, which is annotated with `must_use`, helps prevent bugs
/// wherein the caller forgets to call `World::drain_packets` afterwards.
#[must_use]
pub struct MustDrain;
