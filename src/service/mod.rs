pub mod auth;
pub mod delivery;
pub mod moderation;
pub mod offline;
pub mod reminder;
pub mod room;
pub mod validator;
