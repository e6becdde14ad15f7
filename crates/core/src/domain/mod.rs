pub mod capability;
pub mod conversation;
pub mod followup;
pub mod usage;
