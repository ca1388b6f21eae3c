pub mod capabilities;
pub mod demo;
pub mod health;
pub mod settings;
pub mod stream;
