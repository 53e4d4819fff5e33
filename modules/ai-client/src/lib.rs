pub mod error;
pub mod openai;
pub mod traits;
pub mod util;

pub use error::AiError;
pub use openai::OpenAi;
pub use traits::{CompletionModel, Message, MessageRole};
pub use util::{extract_json_object, strip_code_blocks};
