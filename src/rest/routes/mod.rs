pub mod chats;
pub mod forges;
pub mod health;
pub mod repos;
