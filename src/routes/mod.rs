pub mod conversations;
pub mod messages;
pub mod reactions;
pub mod wsroute;
