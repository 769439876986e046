mod config;
mod quiz;

use std::sync::Arc;

use config::Config;
use dotenv::dotenv;
use log::{debug, info, warn};
use quiz::{
    attempt::{Attempt, AttemptError},
    catalog::{CatalogError, JsonCatalog, TestCatalog},
    session::{SessionEvent, SessionId, Sessions},
    Test, TestType,
};
use teloxide::{
    dispatching::dialogue::{serializer::Json, ErasedStorage, SqliteStorage, Storage},
    prelude::*,
    types::{KeyboardButton, KeyboardMarkup, MessageId, ParseMode},
    utils::html,
};
use tokio::sync::mpsc::{self, UnboundedReceiver};

type QuizDialogue = Dialogue<State, ErasedStorage<State>>;
type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
type DialogueStorage = Arc<ErasedStorage<State>>;
type SharedCatalog = Arc<dyn TestCatalog + Send + Sync>;

/// Where the chat is in the menu. The attempt itself lives in `Sessions`
/// and is never written to the dialogue storage.
#[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
pub enum State {
    #[default]
    Start,
    ReceiveTestTypeChoice,
    ReceiveTestChoice {
        test_type: Option<TestType>,
    },
    TakingTest {
        test_id: String,
    },
    ReviewingResult {
        test_id: String,
    },
}

#[tokio::main]
async fn main() -> HandlerResult {
    // The .env file is optional, plain environment variables work too
    dotenv().ok();
    pretty_env_logger::init();
    let config = Config::from_env()?;
    info!("Starting set theory quiz bot...");

    let bot = Bot::from_env();

    info!("Opening dialogue storage at {}", config.db_path);
    let storage: DialogueStorage = SqliteStorage::open(&config.db_path, Json).await?.erase();

    info!("Loading tests from {}", config.catalog_path.display());
    let catalog = JsonCatalog::open(&config.catalog_path)?;
    info!("Catalog loaded: {} published tests", catalog.published_tests().len());
    let catalog: SharedCatalog = Arc::new(catalog);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let sessions = Sessions::new(events_tx);
    tokio::spawn(handle_session_events(
        bot.clone(),
        storage.clone(),
        sessions.clone(),
        events_rx,
    ));

    Dispatcher::builder(
        bot,
        Update::filter_message()
            .enter_dialogue::<Message, ErasedStorage<State>, State>()
            .branch(dptree::case![State::Start].endpoint(start))
            .branch(dptree::case![State::ReceiveTestTypeChoice].endpoint(receive_test_type_choice))
            .branch(dptree::case![State::ReceiveTestChoice { test_type }].endpoint(receive_test_choice))
            .branch(dptree::case![State::TakingTest { test_id }].endpoint(taking_test))
            .branch(dptree::case![State::ReviewingResult { test_id }].endpoint(reviewing_result)),
    )
    .dependencies(dptree::deps![storage, catalog, sessions])
    .enable_ctrlc_handler()
    .build()
    .dispatch()
    .await;

    Ok(())
}

const GREETING_TEXT: &str = "Привет! Я помогу проверить знания по теории множеств. Выберите, какие тесты показать.";

const ALL_TESTS: &str = "Все тесты";
const THEORY_TESTS: &str = "Теория";
const PRACTICE_TESTS: &str = "Практика";
const BACK_TO_TYPES: &str = "↩️ Назад";

const PREVIOUS: &str = "⬅️ Назад";
const NEXT: &str = "Далее ➡️";
const FINISH: &str = "🏁 Завершить тест";
const QUIT: &str = "🚪 Выйти из теста";

const RESTART: &str = "🔄 Пройти заново";
const TO_TESTS: &str = "📋 К списку тестов";

async fn start(bot: Bot, dialogue: QuizDialogue, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, GREETING_TEXT)
        .reply_markup(test_types_keyboard())
        .await?;

    dialogue.update(State::ReceiveTestTypeChoice).await?;
    Ok(())
}

async fn receive_test_type_choice(
    bot: Bot,
    dialogue: QuizDialogue,
    catalog: SharedCatalog,
    msg: Message,
) -> HandlerResult {
    let test_type = match msg.text() {
        Some(ALL_TESTS) => None,
        Some(THEORY_TESTS) => Some(TestType::Theory),
        Some(PRACTICE_TESTS) => Some(TestType::Practice),
        _ => {
            bot.send_message(msg.chat.id, "Пожалуйста, выберите один из вариантов")
                .reply_markup(test_types_keyboard())
                .await?;
            return Ok(());
        }
    };

    let tests = catalog.published_by_type(test_type);
    if tests.is_empty() {
        bot.send_message(msg.chat.id, "Тестов этого типа пока нет")
            .reply_markup(test_types_keyboard())
            .await?;
        return Ok(());
    }

    bot.send_message(msg.chat.id, test_list_text(&tests))
        .parse_mode(ParseMode::Html)
        .reply_markup(test_list_keyboard(&tests))
        .await?;

    dialogue.update(State::ReceiveTestChoice { test_type }).await?;
    Ok(())
}

async fn receive_test_choice(
    bot: Bot,
    dialogue: QuizDialogue,
    catalog: SharedCatalog,
    sessions: Sessions,
    test_type: Option<TestType>,
    msg: Message,
) -> HandlerResult {
    if msg.text() == Some(BACK_TO_TYPES) {
        return back_to_test_types(&bot, &dialogue, msg.chat.id).await;
    }

    let tests = catalog.published_by_type(test_type);
    let chosen = msg
        .text()
        .and_then(parse_list_choice)
        .and_then(|number| tests.get(number - 1).cloned());

    match chosen {
        Some(test) => start_test(&bot, &dialogue, &sessions, msg.chat.id, test).await,
        None => {
            bot.send_message(msg.chat.id, "Пожалуйста, выберите тест из списка")
                .reply_markup(test_list_keyboard(&tests))
                .await?;
            Ok(())
        }
    }
}

async fn taking_test(
    bot: Bot,
    dialogue: QuizDialogue,
    sessions: Sessions,
    test_id: String,
    msg: Message,
) -> HandlerResult {
    let chat_id = msg.chat.id;

    if msg.text() == Some(QUIT) {
        sessions.abandon(chat_id);
        bot.send_message(chat_id, "Тест прерван").await?;
        return back_to_test_types(&bot, &dialogue, chat_id).await;
    }

    let action = match msg.text().and_then(parse_action) {
        Some(action) => action,
        None => {
            bot.send_message(chat_id, "Пожалуйста, используйте кнопки ниже")
                .await?;
            return send_current_question(&bot, &sessions, chat_id).await;
        }
    };

    let outcome = sessions.update(chat_id, |attempt| {
        let result = apply_action(attempt, action);
        (result, attempt.is_finished())
    });

    match outcome {
        // The attempt was lost, most likely to a restart of the bot
        None => {
            bot.send_message(chat_id, "Эта попытка больше не активна, начните тест заново")
                .await?;
            back_to_test_types(&bot, &dialogue, chat_id).await
        }
        Some((Ok(()), true)) => {
            dialogue.update(State::ReviewingResult { test_id }).await?;
            match sessions.current(chat_id) {
                Some(session) => send_result(&bot, &sessions, chat_id, session).await,
                None => Ok(()),
            }
        }
        Some((Ok(()), false)) => send_current_question(&bot, &sessions, chat_id).await,
        // The timer got there first and the result is already on its way
        Some((Err(AttemptError::NotInProgress), _)) => {
            dialogue.update(State::ReviewingResult { test_id }).await?;
            bot.send_message(chat_id, "Тест уже завершен")
                .reply_markup(result_keyboard())
                .await?;
            Ok(())
        }
        Some((Err(err), _)) => {
            debug!("Chat {}: {}", chat_id, err);
            bot.send_message(chat_id, rejection_hint(&err)).await?;
            Ok(())
        }
    }
}

async fn reviewing_result(
    bot: Bot,
    dialogue: QuizDialogue,
    catalog: SharedCatalog,
    sessions: Sessions,
    test_id: String,
    msg: Message,
) -> HandlerResult {
    let chat_id = msg.chat.id;
    match msg.text() {
        Some(RESTART) => match catalog.find(&test_id) {
            Ok(test) => start_test(&bot, &dialogue, &sessions, chat_id, test).await,
            Err(CatalogError::NotFound(_)) => {
                bot.send_message(chat_id, "Тест не найден").await?;
                back_to_test_types(&bot, &dialogue, chat_id).await
            }
            Err(err) => Err(err.into()),
        },
        Some(TO_TESTS) => {
            sessions.abandon(chat_id);
            back_to_test_types(&bot, &dialogue, chat_id).await
        }
        _ => {
            bot.send_message(chat_id, "Пожалуйста, выберите один из вариантов")
                .reply_markup(result_keyboard())
                .await?;
            Ok(())
        }
    }
}

async fn start_test(
    bot: &Bot,
    dialogue: &QuizDialogue,
    sessions: &Sessions,
    chat_id: ChatId,
    test: Arc<Test>,
) -> HandlerResult {
    let intro = test_intro(&test);
    let test_id = test.id().to_string();
    let attempt = Attempt::start(test, &mut rand::thread_rng());
    sessions.begin(chat_id, attempt);

    bot.send_message(chat_id, intro)
        .parse_mode(ParseMode::Html)
        .await?;
    send_current_question(bot, sessions, chat_id).await?;

    dialogue.update(State::TakingTest { test_id }).await?;
    Ok(())
}

async fn back_to_test_types(bot: &Bot, dialogue: &QuizDialogue, chat_id: ChatId) -> HandlerResult {
    bot.send_message(chat_id, "Какие тесты показать?")
        .reply_markup(test_types_keyboard())
        .await?;
    dialogue.update(State::ReceiveTestTypeChoice).await?;
    Ok(())
}

async fn send_current_question(bot: &Bot, sessions: &Sessions, chat_id: ChatId) -> HandlerResult {
    let prompt = sessions.read(chat_id, |attempt| {
        (question_text(attempt), question_keyboard(attempt))
    });
    if let Some((text, keyboard)) = prompt {
        let message = bot
            .send_message(chat_id, text)
            .parse_mode(ParseMode::Html)
            .reply_markup(keyboard)
            .await?;
        sessions.set_prompt(chat_id, message.id);
    }
    Ok(())
}

/// Sends the review of a finished session and drops the session. The chat
/// can only start over from the catalog afterwards.
async fn send_result(
    bot: &Bot,
    sessions: &Sessions,
    chat_id: ChatId,
    session: SessionId,
) -> HandlerResult {
    let review = match sessions.read_session(chat_id, session, |attempt, _| attempt.review()) {
        Some(review) => review?,
        None => return Ok(()),
    };
    sessions.close(chat_id, session);

    let messages = review.to_html_messages();
    let last = messages.len() - 1;
    for (index, message) in messages.into_iter().enumerate() {
        let request = bot.send_message(chat_id, message).parse_mode(ParseMode::Html);
        if index == last {
            request.reply_markup(result_keyboard()).await?;
        } else {
            request.await?;
        }
    }
    Ok(())
}

async fn handle_session_events(
    bot: Bot,
    storage: DialogueStorage,
    sessions: Sessions,
    mut events: UnboundedReceiver<SessionEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Remaining { chat_id, session, .. } => {
                refresh_question(&bot, &sessions, chat_id, session).await
            }
            SessionEvent::Expired { chat_id, session } => {
                let announced = announce_expired(&bot, &storage, &sessions, chat_id, session).await;
                if let Err(err) = announced {
                    warn!("Failed to announce the result in chat {}: {}", chat_id, err);
                }
            }
        }
    }
}

/// Rewrites the last question message with the current remaining time.
async fn refresh_question(bot: &Bot, sessions: &Sessions, chat_id: ChatId, session: SessionId) {
    let refreshed = sessions.read_session(chat_id, session, refreshed_prompt).flatten();
    let (message_id, text) = match refreshed {
        Some(refreshed) => refreshed,
        None => return,
    };
    if let Err(err) = bot
        .edit_message_text(chat_id, message_id, text)
        .parse_mode(ParseMode::Html)
        .await
    {
        debug!("Could not refresh the question in chat {}: {}", chat_id, err);
    }
}

fn refreshed_prompt(attempt: &Attempt, prompt: Option<MessageId>) -> Option<(MessageId, String)> {
    if attempt.is_finished() {
        return None;
    }
    prompt.map(|message_id| (message_id, question_text(attempt)))
}

async fn announce_expired(
    bot: &Bot,
    storage: &DialogueStorage,
    sessions: &Sessions,
    chat_id: ChatId,
    session: SessionId,
) -> HandlerResult {
    let test_id = sessions
        .read_session(chat_id, session, |attempt, _| {
            attempt
                .is_finished()
                .then(|| attempt.test().id().to_string())
        })
        .flatten();
    let test_id = match test_id {
        Some(test_id) => test_id,
        None => {
            debug!(
                "Ignoring expiry of {:?} in chat {}, it is no longer current",
                session, chat_id
            );
            return Ok(());
        }
    };

    QuizDialogue::new(storage.clone(), chat_id)
        .update(State::ReviewingResult { test_id })
        .await?;
    bot.send_message(chat_id, "⏰ Время вышло!").await?;
    send_result(bot, sessions, chat_id, session).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Select(usize),
    Next,
    Previous,
    Finish,
}

fn parse_action(text: &str) -> Option<Action> {
    match text {
        NEXT => Some(Action::Next),
        PREVIOUS => Some(Action::Previous),
        FINISH => Some(Action::Finish),
        // Option buttons are numbered from 1
        _ => match text.trim().parse::<usize>() {
            Ok(number) if number > 0 => Some(Action::Select(number - 1)),
            _ => None,
        },
    }
}

fn apply_action(attempt: &mut Attempt, action: Action) -> Result<(), AttemptError> {
    match action {
        Action::Select(option) => {
            let position = attempt.current_position();
            attempt.select_answer(position, option)
        }
        Action::Next => attempt.go_next(),
        Action::Previous => attempt.go_previous(),
        Action::Finish => {
            if attempt.finish() {
                Ok(())
            } else {
                Err(AttemptError::NotInProgress)
            }
        }
    }
}

fn rejection_hint(err: &AttemptError) -> &'static str {
    match err {
        AttemptError::Unanswered(_) => "Сначала выберите ответ на этот вопрос",
        AttemptError::AtFirstQuestion => "Это первый вопрос",
        AttemptError::AtLastQuestion => "Это последний вопрос, нажмите «Завершить тест»",
        AttemptError::OptionOutOfRange { .. } => "Такого варианта ответа нет",
        _ => "Сейчас это действие недоступно",
    }
}

/// "1. Title" or just "1" picks the first test.
fn parse_list_choice(text: &str) -> Option<usize> {
    let number = text.split_once('.').map_or(text, |(number, _)| number);
    number.trim().parse::<usize>().ok().filter(|n| *n > 0)
}

fn questions_label(amount: usize) -> String {
    let word = match (amount % 10, amount % 100) {
        (_, 11..=14) => "вопросов",
        (1, _) => "вопрос",
        (2..=4, _) => "вопроса",
        _ => "вопросов",
    };
    format!("{} {}", amount, word)
}

fn test_types_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![
        KeyboardButton::new(ALL_TESTS),
        KeyboardButton::new(THEORY_TESTS),
        KeyboardButton::new(PRACTICE_TESTS),
    ]])
}

fn test_list_text(tests: &[Arc<Test>]) -> String {
    let mut text = String::from("<b>Доступные тесты</b>");
    for (index, test) in tests.iter().enumerate() {
        text.push_str(&format!(
            "\n\n{}. <b>{}</b> · {}",
            index + 1,
            html::escape(test.title()),
            test.test_type()
        ));
        if let Some(description) = test.description() {
            text.push_str(&format!("\n{}", html::escape(description)));
        }
        text.push_str(&format!("\n📝 {}", questions_label(test.questions().len())));
        if let Some(minutes) = test.time_limit_minutes() {
            text.push_str(&format!(" · ⏱ {} мин", minutes));
        }
    }
    text
}

fn test_list_keyboard(tests: &[Arc<Test>]) -> KeyboardMarkup {
    let mut rows: Vec<Vec<KeyboardButton>> = tests
        .iter()
        .enumerate()
        .map(|(index, test)| vec![KeyboardButton::new(format!("{}. {}", index + 1, test.title()))])
        .collect();
    rows.push(vec![KeyboardButton::new(BACK_TO_TYPES)]);
    KeyboardMarkup::new(rows)
}

fn test_intro(test: &Test) -> String {
    let mut text = format!("<b>{}</b>", html::escape(test.title()));
    if let Some(description) = test.description() {
        text.push_str(&format!("\n{}", html::escape(description)));
    }
    text.push_str(&format!("\n\n📝 {}", questions_label(test.questions().len())));
    match test.time_limit_minutes() {
        Some(minutes) => text.push_str(&format!("\n⏱ Ограничение по времени: {} мин", minutes)),
        None => text.push_str("\n⏱ Без ограничения по времени"),
    }
    text
}

fn question_text(attempt: &Attempt) -> String {
    let position = attempt.current_position();
    let question = attempt.current_question();
    let selected = attempt.selected_at(position);

    let mut text = format!("Вопрос {} из {}", position + 1, attempt.len());
    if let Some(countdown) = attempt.countdown() {
        text.push_str(&format!(" · ⏱ {}", countdown));
    }
    text.push_str(&format!("\n\n<b>{}</b>\n", html::escape(question.text())));

    for (index, option) in question.options().iter().enumerate() {
        let mark = if selected == Some(index) { "🔘" } else { "⚪" };
        text.push_str(&format!("\n{} {}. {}", mark, index + 1, html::escape(option)));
    }
    if selected.is_none() {
        text.push_str("\n\n<i>Выберите вариант ответа</i>");
    }
    text
}

fn question_keyboard(attempt: &Attempt) -> KeyboardMarkup {
    let options = attempt.current_question().options().len();
    let mut rows: Vec<Vec<KeyboardButton>> = (1..=options)
        .map(|number| KeyboardButton::new(number.to_string()))
        .collect::<Vec<_>>()
        .chunks(4)
        .map(|row| row.to_vec())
        .collect();

    let mut navigation = Vec::new();
    if attempt.current_position() > 0 {
        navigation.push(KeyboardButton::new(PREVIOUS));
    }
    if attempt.is_last_question() {
        navigation.push(KeyboardButton::new(FINISH));
    } else {
        navigation.push(KeyboardButton::new(NEXT));
    }
    rows.push(navigation);
    rows.push(vec![KeyboardButton::new(QUIT)]);
    KeyboardMarkup::new(rows)
}

fn result_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![
        KeyboardButton::new(RESTART),
        KeyboardButton::new(TO_TESTS),
    ]])
}
