pub mod error;
pub mod id;
pub mod interaction;
pub mod principal;

pub use error::{Result, TypesError};
pub use id::{OrderId, TaskId, UserId};
pub use interaction::{validate_order_target, validate_target_url, InteractionKind};
pub use principal::Principal;
