use axum::Json;
use common::types::MessageResponse;

pub const WELCOME_MESSAGE: &str = "Welcome to the protected endpoint!";

pub async fn protected() -> Json<MessageResponse> {
    Json(MessageResponse::new(WELCOME_MESSAGE, 200))
}
