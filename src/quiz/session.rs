use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info};
use teloxide::types::{ChatId, MessageId};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::quiz::attempt::Attempt;
use crate::quiz::timer::Tick;

const TICK_PERIOD: Duration = Duration::from_secs(1);

/// How often, in seconds, the remaining time is pushed to the chat.
const REFRESH_EVERY: u32 = 10;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tells apart successive attempts in the same chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

/// Sent by a session's ticker. Always names the session it came from, so a
/// chat that has moved on to another attempt can ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Remaining {
        chat_id: ChatId,
        session: SessionId,
        seconds: u32,
    },
    Expired {
        chat_id: ChatId,
        session: SessionId,
    },
}

/// Owns one attempt and, for timed tests, the task that ticks it.
///
/// Every transition and every tick goes through the same mutex, so a tick
/// never lands in the middle of a user action. The tick task is aborted as
/// soon as the attempt finishes or the session is dropped.
pub struct Session {
    id: SessionId,
    attempt: Arc<Mutex<Attempt>>,
    ticker: Option<JoinHandle<()>>,
    /// The last question message, refreshed with the remaining time.
    prompt: Option<MessageId>,
}

impl Session {
    /// Must be called inside a tokio runtime when the test is timed.
    pub fn start(
        chat_id: ChatId,
        id: SessionId,
        attempt: Attempt,
        events: UnboundedSender<SessionEvent>,
    ) -> Self {
        let timed = attempt.countdown().is_some();
        let attempt = Arc::new(Mutex::new(attempt));
        let ticker =
            timed.then(|| tokio::spawn(run_ticker(chat_id, id, attempt.clone(), events)));
        Self {
            id,
            attempt,
            ticker,
            prompt: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn read<T>(&self, f: impl FnOnce(&Attempt) -> T) -> T {
        f(&lock(&self.attempt))
    }

    pub fn update<T>(&mut self, f: impl FnOnce(&mut Attempt) -> T) -> T {
        let (result, finished) = {
            let mut attempt = lock(&self.attempt);
            let result = f(&mut attempt);
            (result, attempt.is_finished())
        };
        if finished {
            self.stop_ticker();
        }
        result
    }

    #[cfg(test)]
    fn is_ticking(&self) -> bool {
        self.ticker.as_ref().map_or(false, |t| !t.is_finished())
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}

async fn run_ticker(
    chat_id: ChatId,
    session: SessionId,
    attempt: Arc<Mutex<Attempt>>,
    events: UnboundedSender<SessionEvent>,
) {
    let mut interval = tokio::time::interval(TICK_PERIOD);
    // The first tick completes immediately
    interval.tick().await;
    loop {
        interval.tick().await;
        let tick = lock(&attempt).tick();
        let event = match tick {
            Some(Tick::Running(seconds)) if seconds % REFRESH_EVERY == 0 => {
                SessionEvent::Remaining {
                    chat_id,
                    session,
                    seconds,
                }
            }
            Some(Tick::Running(_)) => continue,
            Some(Tick::Expired) => {
                info!("Attempt in chat {} ran out of time", chat_id);
                SessionEvent::Expired { chat_id, session }
            }
            Some(Tick::AlreadyExpired) | None => break,
        };
        let expired = matches!(event, SessionEvent::Expired { .. });
        if events.send(event).is_err() {
            debug!("Nobody is listening for session events");
        }
        if expired {
            break;
        }
    }
}

/// Sessions by chat. Starting a new session for a chat drops the old one,
/// which cancels its ticker.
#[derive(Clone)]
pub struct Sessions {
    sessions: Arc<Mutex<HashMap<ChatId, Session>>>,
    next_id: Arc<AtomicU64>,
    events: UnboundedSender<SessionEvent>,
}

impl Sessions {
    pub fn new(events: UnboundedSender<SessionEvent>) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
            events,
        }
    }

    pub fn begin(&self, chat_id: ChatId, attempt: Attempt) -> SessionId {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let session = Session::start(chat_id, id, attempt, self.events.clone());
        let previous = lock(&self.sessions).insert(chat_id, session);
        if previous.is_some() {
            debug!("Replaced the previous attempt in chat {}", chat_id);
        }
        id
    }

    pub fn read<T>(&self, chat_id: ChatId, f: impl FnOnce(&Attempt) -> T) -> Option<T> {
        lock(&self.sessions).get(&chat_id).map(|session| session.read(f))
    }

    /// Like `read`, but only while `session` is still the chat's current one.
    /// The closure also gets the last question message, if one was recorded.
    pub fn read_session<T>(
        &self,
        chat_id: ChatId,
        session: SessionId,
        f: impl FnOnce(&Attempt, Option<MessageId>) -> T,
    ) -> Option<T> {
        lock(&self.sessions)
            .get(&chat_id)
            .filter(|current| current.id == session)
            .map(|current| current.read(|attempt| f(attempt, current.prompt)))
    }

    pub fn update<T>(&self, chat_id: ChatId, f: impl FnOnce(&mut Attempt) -> T) -> Option<T> {
        lock(&self.sessions)
            .get_mut(&chat_id)
            .map(|session| session.update(f))
    }

    pub fn current(&self, chat_id: ChatId) -> Option<SessionId> {
        lock(&self.sessions).get(&chat_id).map(Session::id)
    }

    pub fn set_prompt(&self, chat_id: ChatId, message_id: MessageId) {
        if let Some(session) = lock(&self.sessions).get_mut(&chat_id) {
            session.prompt = Some(message_id);
        }
    }

    /// Discards the chat's attempt. Returns `false` if there was none.
    pub fn abandon(&self, chat_id: ChatId) -> bool {
        let removed = lock(&self.sessions).remove(&chat_id);
        if removed.is_some() {
            info!("Abandoned attempt in chat {}", chat_id);
        }
        removed.is_some()
    }

    /// Drops a finished session once its result has been shown. Does nothing
    /// if the chat has already moved on to another session.
    pub fn close(&self, chat_id: ChatId, session: SessionId) -> bool {
        let mut sessions = lock(&self.sessions);
        if sessions.get(&chat_id).map(Session::id) != Some(session) {
            return false;
        }
        sessions.remove(&chat_id);
        debug!("Closed session {:?} in chat {}", session, chat_id);
        true
    }

    #[cfg(test)]
    fn is_ticking(&self, chat_id: ChatId) -> bool {
        lock(&self.sessions)
            .get(&chat_id)
            .map_or(false, Session::is_ticking)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tokio::sync::mpsc;

    use super::*;
    use crate::quiz::attempt::Phase;
    use crate::quiz::fixtures;

    const CHAT: ChatId = ChatId(1);

    fn attempt(time_limit_minutes: Option<u32>) -> Attempt {
        Attempt::start(
            fixtures::test(3, time_limit_minutes),
            &mut StdRng::seed_from_u64(3),
        )
    }

    fn expired_session(event: SessionEvent) -> Option<SessionId> {
        match event {
            SessionEvent::Expired { session, .. } => Some(session),
            SessionEvent::Remaining { .. } => None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timer_expiry_finishes_and_reports_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sessions = Sessions::new(tx);
        let id = sessions.begin(CHAT, attempt(Some(1)));

        let mut remaining = Vec::new();
        let expired = loop {
            match rx.recv().await.unwrap() {
                SessionEvent::Remaining { seconds, session, .. } => {
                    assert_eq!(session, id);
                    remaining.push(seconds);
                }
                event => break event,
            }
        };
        assert_eq!(remaining, vec![50, 40, 30, 20, 10]);
        assert_eq!(
            expired,
            SessionEvent::Expired {
                chat_id: CHAT,
                session: id
            }
        );
        assert_eq!(
            sessions.read(CHAT, |a| (a.phase(), a.remaining_seconds())),
            Some((Phase::Finished, Some(0)))
        );

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
        assert!(!sessions.is_ticking(CHAT));
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_second() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let sessions = Sessions::new(tx);
        sessions.begin(CHAT, attempt(Some(1)));

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(sessions.read(CHAT, Attempt::remaining_seconds), Some(Some(50)));
    }

    #[tokio::test(start_paused = true)]
    async fn finishing_cancels_the_ticker() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sessions = Sessions::new(tx);
        sessions.begin(CHAT, attempt(Some(1)));
        assert!(sessions.is_ticking(CHAT));

        tokio::time::sleep(Duration::from_millis(5_500)).await;
        assert_eq!(sessions.update(CHAT, Attempt::finish), Some(true));
        assert!(!sessions.is_ticking(CHAT));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(sessions.read(CHAT, Attempt::remaining_seconds), Some(Some(55)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoning_cancels_the_ticker() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sessions = Sessions::new(tx);
        sessions.begin(CHAT, attempt(Some(1)));

        assert!(sessions.abandon(CHAT));
        assert!(!sessions.abandon(CHAT));
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(sessions.read(CHAT, Attempt::phase), None);
    }

    #[tokio::test]
    async fn untimed_attempt_has_no_ticker() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let sessions = Sessions::new(tx);
        sessions.begin(CHAT, attempt(None));
        assert!(!sessions.is_ticking(CHAT));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_expiry_is_ignored_after_a_new_attempt_starts() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sessions = Sessions::new(tx);
        let first = sessions.begin(CHAT, attempt(Some(1)));

        let expired = loop {
            if let Some(session) = expired_session(rx.recv().await.unwrap()) {
                break session;
            }
        };
        assert_eq!(expired, first);

        // The user starts over before the expiry is handled
        let second = sessions.begin(CHAT, attempt(Some(1)));
        assert_ne!(first, second);

        assert_eq!(sessions.read_session(CHAT, expired, |a, _| a.is_finished()), None);
        assert!(!sessions.close(CHAT, expired));
        assert_eq!(
            sessions.read_session(CHAT, second, |a, _| a.phase()),
            Some(Phase::InProgress)
        );
        assert_eq!(sessions.current(CHAT), Some(second));
    }

    #[tokio::test]
    async fn close_drops_only_the_named_session() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let sessions = Sessions::new(tx);
        let id = sessions.begin(CHAT, attempt(None));
        sessions.update(CHAT, Attempt::finish);

        assert!(sessions.close(CHAT, id));
        assert_eq!(sessions.current(CHAT), None);
        assert!(!sessions.close(CHAT, id));
    }

    #[tokio::test]
    async fn remembers_the_question_message() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let sessions = Sessions::new(tx);
        let id = sessions.begin(CHAT, attempt(None));
        assert_eq!(sessions.read_session(CHAT, id, |_, prompt| prompt), Some(None));

        sessions.set_prompt(CHAT, MessageId(42));
        assert_eq!(
            sessions.read_session(CHAT, id, |_, prompt| prompt),
            Some(Some(MessageId(42)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn starting_again_replaces_the_old_attempt_and_ticker() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sessions = Sessions::new(tx);
        sessions.begin(CHAT, attempt(Some(1)));
        sessions.update(CHAT, |a| {
            a.select_answer(0, 1).unwrap();
        });
        tokio::time::sleep(Duration::from_millis(30_500)).await;

        let second = sessions.begin(CHAT, attempt(Some(1)));
        let (answers_empty, remaining) = sessions
            .read(CHAT, |a| (a.answers().is_empty(), a.remaining_seconds()))
            .unwrap();
        assert!(answers_empty);
        assert_eq!(remaining, Some(60));

        // Only the new session keeps reporting
        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(
            rx.try_recv(),
            Ok(SessionEvent::Remaining {
                chat_id: CHAT,
                session: second,
                seconds: 50
            })
        );
    }
}
