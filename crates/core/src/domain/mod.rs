pub mod conversation;
pub mod crm;
pub mod lead;
pub mod machinery;
pub mod transcript;
pub mod value;
