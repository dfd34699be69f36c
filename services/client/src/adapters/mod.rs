pub mod console;
pub mod http;
pub mod memory;
pub mod storage;

pub use console::{ConsoleNavigator, ConsoleNotifier};
pub use http::ReqwestTransport;
pub use memory::{MemoryStorage, RecordingNavigator, RecordingNotifier, ScriptedTransport};
pub use storage::FileStorage;
