pub mod loader;
pub mod settings;
pub mod types;
pub mod validator;
