/*!
# Stevedore DevKit - Stubs and test utilities

Lets the relay components be exercised without a broker, without Docker
and without Telegram:
- Recording chat transport for sink and gateway assertions
- Scripted container runtime / node control stubs with invocation counters
- Envelope builders matching the wire contract
*/

pub mod chat_stub;
pub mod envelopes;
pub mod runtime_stub;

pub use chat_stub::RecordingChat;
pub use envelopes::{command_envelope, event_envelope_json, test_identity};
pub use runtime_stub::{StubControl, StubRuntime};
