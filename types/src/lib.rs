pub mod protocol;
pub mod request;
pub mod response;
pub mod script;
pub mod intent;

pub use protocol::{
    decode_frame, encode_audio_frame, encode_full_request, DecodeError, EncodeError, Frame, Payload,
};
pub use request::{RecognitionRequest, SynthesisRequest};
pub use response::ServerResponse;
pub use script::{LineId, RoleKey, ScriptDocument, ScriptLine};
pub use intent::{Intent, IntentContext};
