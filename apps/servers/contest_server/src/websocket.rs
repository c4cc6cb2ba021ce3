use crate::state::AppState;
use axum::routing::get;
use axum::Router;

pub mod heartbeat;
pub mod join;
pub mod public;
pub mod rooms;
pub mod session;
pub mod submit;

pub use rooms::RoomRegistry;
pub use submit::LeaderboardDebouncer;

/// Two channels, split by path suffix: `/contest` carries authenticated
/// participant sessions, `/public` carries anonymous viewers.
pub fn router() -> Router<AppState> {
	Router::new()
		.route("/ws/contest", get(session::contest_ws_handler))
		.route("/ws/public", get(public::public_ws_handler))
}
