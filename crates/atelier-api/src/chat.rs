use std::collections::HashMap;

use axum::{Extension, Json, extract::{Path, State}};
use uuid::Uuid;

use atelier_db::queries::{message_from_row, user_from_row};
use atelier_types::api::{
    AdminResponse, Claims, ConversationSummary, ConversationsResponse, MessagesResponse,
};
use atelier_types::conversation::conversation_id;

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult, blocking};

/// How many recent messages feed the conversation overview grouping.
const CONVERSATION_WINDOW: u32 = 500;

/// The storefront chat pairs every customer with the single admin; this is
/// how the client discovers who to talk to.
pub async fn get_admin(State(state): State<AppState>) -> ApiResult<Json<AdminResponse>> {
    let row = blocking(move || {
        state
            .db
            .find_admin()?
            .ok_or_else(|| ApiError::NotFound("Admin not found".into()))
    })
    .await?;

    Ok(Json(AdminResponse {
        success: true,
        admin: user_from_row(row),
    }))
}

/// Ordered history of one conversation. The path segment is either a full
/// conversation id or, when it lacks the `_` separator, the other
/// participant's user id — in that case the conversation id is derived with
/// the caller's own.
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation): Path<String>,
) -> ApiResult<Json<MessagesResponse>> {
    let conversation = if conversation.contains('_') {
        conversation
    } else {
        let other: Uuid = conversation.parse().map_err(|_| {
            ApiError::validation("conversationId", "Not a conversation id or user id")
        })?;
        conversation_id(claims.sub, other)
    };

    let rows = blocking(move || Ok(state.db.conversation_messages(&conversation)?)).await?;
    let messages: Vec<_> = rows.into_iter().map(message_from_row).collect();

    Ok(Json(MessagesResponse {
        success: true,
        count: messages.len(),
        messages,
    }))
}

/// Conversation overview for the caller: one row per distinct conversation
/// with the other participant, the newest message, and an unread count,
/// grouped over the most recent messages.
pub async fn get_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<ConversationsResponse>> {
    let me = claims.sub;
    let rows = blocking(move || {
        Ok(state
            .db
            .recent_messages_for_user(&me.to_string(), CONVERSATION_WINDOW)?)
    })
    .await?;

    let mut summaries: Vec<ConversationSummary> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    // Rows arrive newest first, so the first message seen per conversation
    // is its last message.
    for msg in rows.into_iter().map(message_from_row) {
        let idx = match index.get(&msg.conversation_id) {
            Some(&idx) => idx,
            None => {
                let other = if msg.sender.id == me {
                    msg.receiver.clone()
                } else {
                    msg.sender.clone()
                };
                index.insert(msg.conversation_id.clone(), summaries.len());
                summaries.push(ConversationSummary {
                    conversation_id: msg.conversation_id.clone(),
                    user: other,
                    last_message: msg.clone(),
                    unread_count: 0,
                });
                summaries.len() - 1
            }
        };

        if msg.receiver.id == me && !msg.read {
            summaries[idx].unread_count += 1;
        }
    }

    Ok(Json(ConversationsResponse {
        success: true,
        count: summaries.len(),
        conversations: summaries,
    }))
}
