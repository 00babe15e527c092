pub mod ocpp_frame;
pub mod shutdown;

pub use ocpp_frame::{ErrorCode, FrameError, OcppFrame, UNPARSABLE_MESSAGE_ID};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
