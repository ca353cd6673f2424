//! Plain data shared between the HTTP layer and the copy services.

pub mod copy;
pub mod object;
