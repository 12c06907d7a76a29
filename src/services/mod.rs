pub mod cooldown;
pub mod corrector;
pub mod image;
pub mod llm;
pub mod manuscript;
pub mod rhyme;
pub mod setup;
pub mod validator;
pub mod vocabulary;
pub mod workflow;
