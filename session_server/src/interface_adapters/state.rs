use crate::use_cases::SessionHandle;

#[derive(Clone)]
pub struct AppState {
    // The authoritative session this server hosts.
    pub session: SessionHandle,
}
