pub mod error;
pub mod mux;
pub mod protocol;
pub mod provider;
pub mod resolver;
pub mod session;
pub mod source;
pub mod tailer;
pub mod transport;

pub use error::{
    ProviderError, RequestError, ResolveError, SessionError, StreamOpenError, TransportError,
};
pub use mux::{Multiplexer, MuxConfig};
pub use protocol::{ErrorMessage, LogMessage, ServerMessage, SubscribeMessage};
pub use provider::{
    InstanceInfo, LogSourceProvider, LogStream, MemoryInstance, MemoryProvider, Script,
};
pub use resolver::Resolver;
pub use session::{serve, CloseReason, Session, SessionConfig, SessionReport, SessionState};
pub use source::{LabelSelector, LogEvent, SelectionRequest, SourceDescriptor, StreamOptions, Target};
pub use tailer::{Tailer, TailerExit, TailerReport, MAX_LINE_BYTES};
pub use transport::{memory_transport, EventSink, InboundStream};
