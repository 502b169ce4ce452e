pub mod matches;
pub mod queue;
pub mod states;
pub mod uow;

pub use matches::MatchStore;
pub use queue::{QueueStore, RedisQueueStore};
pub use states::InMemoryStateStore;
pub use uow::{SqlxUnitOfWorkFactory, UnitOfWork, UnitOfWorkFactory};
