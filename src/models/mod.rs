pub mod session;

pub use session::{
    ApiResponse, ForceResolution, Outcome, Session, SessionRow, SessionState, Settlement, Side,
    Visibility,
};
