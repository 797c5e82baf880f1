use crate::common::UserId;

/// Người dùng đã đăng nhập trên máy này (một dòng duy nhất).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub created_at: i64,
}
