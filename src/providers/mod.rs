pub mod openai;
pub mod persona;
pub mod sqlite;
