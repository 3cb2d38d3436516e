pub mod openai;

pub use openai::OpenAiInvoker;
