pub mod errors;
pub mod handler;
pub mod inference;
pub mod models;
pub mod prompt_template;
pub mod prompts;
pub mod providers;
