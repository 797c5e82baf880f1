use std::io::BufRead;

use tokio::sync::mpsc;

use crate::chat::resolve_display_names;
use crate::common::{SessionCommand, SessionEvent};
use crate::network::ChatBackend;

use super::components::input_bar;
use super::state::ChatScreenState;

/// Line-based chat screen. Input is read on a plain thread because stdin
/// reads block; events are printed as they arrive.
pub struct ConsoleApp<B> {
    state: ChatScreenState,
    backend: B,
    command_sender: mpsc::Sender<SessionCommand>,
    event_receiver: mpsc::UnboundedReceiver<SessionEvent>,
}

impl<B: ChatBackend> ConsoleApp<B> {
    pub fn new(
        state: ChatScreenState,
        backend: B,
        command_sender: mpsc::Sender<SessionCommand>,
        event_receiver: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Self {
        Self {
            state,
            backend,
            command_sender,
            event_receiver,
        }
    }

    /// Runs until the session stops emitting events.
    pub async fn run(mut self) {
        println!("{}", self.state.header());
        println!("{}", input_bar::HELP);

        spawn_input_reader(self.command_sender.clone());
        // Chỉ giữ sender trong luồng nhập; khi stdin đóng session sẽ tự đóng.
        drop(std::mem::replace(
            &mut self.command_sender,
            mpsc::channel(1).0,
        ));

        while let Some(event) = self.event_receiver.recv().await {
            for line in self.render(event).await {
                println!("{line}");
            }
        }
    }

    /// Looks up senders seen for the first time, then renders `event`.
    pub async fn render(&mut self, event: SessionEvent) -> Vec<String> {
        let unknown = self.state.unknown_senders(&event);
        if !unknown.is_empty() {
            let names = resolve_display_names(&self.backend, &unknown).await;
            self.state.learn_names(names);
        }
        self.state.apply(event)
    }
}

fn spawn_input_reader(sender: mpsc::Sender<SessionCommand>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    log::warn!("Failed to read input: {err}");
                    break;
                }
            };

            let command = match input_bar::parse_line(&line) {
                Ok(command) => command,
                Err(message) => {
                    println!("! {message}");
                    continue;
                }
            };

            let closing = command == SessionCommand::Close;
            if sender.blocking_send(command).is_err() || closing {
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::common::UserId;
    use crate::testing::{FakeBackend, message_at};

    fn app(
        backend: FakeBackend,
    ) -> (ConsoleApp<FakeBackend>, mpsc::UnboundedSender<SessionEvent>) {
        let (command_tx, _command_rx) = mpsc::channel(1);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let state = ChatScreenState::new(
            "7".into(),
            "42".into(),
            HashMap::from([(UserId::new("42"), "Asha".to_string())]),
        );
        (ConsoleApp::new(state, backend, command_tx, event_rx), event_tx)
    }

    #[tokio::test]
    async fn third_party_sender_is_named_on_first_sight() {
        let backend = FakeBackend::with(|state| {
            state.users.insert("9".into(), "Bo".into());
        });
        let (mut app, _events) = app(backend.clone());

        let first = app
            .render(SessionEvent::MessageAppended(message_at(Some(5), "9", "7", "yo", 0)))
            .await;
        let second = app
            .render(SessionEvent::MessageAppended(message_at(Some(6), "9", "7", "again", 1)))
            .await;

        assert!(first[0].ends_with("Bo: yo (#5)"));
        assert!(second[0].ends_with("Bo: again (#6)"));
        assert_eq!(backend.state().user_lookups, 1);
    }

    #[tokio::test]
    async fn failed_lookup_falls_back_to_placeholder_once() {
        let backend = FakeBackend::default();
        let (mut app, _events) = app(backend.clone());

        let lines = app
            .render(SessionEvent::MessageAppended(message_at(Some(5), "9", "7", "yo", 0)))
            .await;
        app.render(SessionEvent::MessageAppended(message_at(Some(6), "9", "7", "again", 1)))
            .await;

        assert!(lines[0].ends_with("User 9: yo (#5)"));
        assert_eq!(backend.state().user_lookups, 1);
    }

    #[tokio::test]
    async fn run_returns_once_the_session_is_gone() {
        let (app, event_tx) = app(FakeBackend::default());

        event_tx.send(SessionEvent::Notice("hello".into())).unwrap();
        drop(event_tx);

        app.run().await;
    }
}
