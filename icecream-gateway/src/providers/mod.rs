//! External provider clients

pub mod chat_completions;
pub mod manim;
pub mod mineru;
pub mod vision;

pub use chat_completions::ChatCompletionsClient;
pub use manim::{ManimClient, RenderedVideo, SceneRenderer};
pub use mineru::{MineruBackend, MineruRecognizer};
pub use vision::VisionRecognizer;
