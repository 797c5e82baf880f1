/// Lệnh từ màn hình chat gửi xuống session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    SendMessage(String),
    /// Xoá một tin nhắn đã lưu trên backend theo id.
    DeleteMessage(i64),
    ClearConversation,
    ArchiveConversation,
    /// Đóng màn hình chat; session sẽ ngắt kết nối.
    Close,
}
