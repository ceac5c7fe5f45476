//! Transport-independent conversation layer: one inbound event in, one reply out.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result};
use regex::Regex;

use crate::admin::{self, Admin, Admins};
use crate::config::{Config, HomeworkLimits};
use crate::error::{CourseError, CourseResult, ErrorKind};
use crate::gate;
use crate::homework::{Grader, HomeworkContent, Intake};
use crate::lbdb::Store;
use crate::lessons;
use crate::models::{HomeworkKind, Lesson, LessonId, User, UserId, Verdict};
use crate::state::UserState;
use crate::support::Support;
use crate::transport::{MessageId, Transport};

const MAX_CMD_LENGTH: usize = 12;

static COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("command pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundContent {
    Text(String),
    Document { name: String, size: u64, reference: String },
    /// `args` is everything after the command name, untouched.
    Command { name: String, args: String },
    /// A reply to one of the bot's earlier messages.
    Reply { to: MessageId, text: String },
}

impl InboundContent {
    /// Splits a plain message into a command (if it starts with `call_token`) or text.
    pub fn parse(text: &str, call_token: char) -> Self {
        let Some(input) = text.strip_prefix(call_token).filter(|input| !input.trim().is_empty()) else {
            return InboundContent::Text(text.to_string());
        };

        let input = input.trim_start();
        let (name, args) = input.split_once(char::is_whitespace).unwrap_or((input, ""));
        InboundContent::Command { name: name.to_string(), args: args.trim().to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub user: UserId,
    pub display_name: String,
    pub content: InboundContent,
}

/// The parts of [`Config`] the conversation needs.
#[derive(Debug, Clone)]
pub struct DialogueConfig {
    pub curator_id: UserId,
    pub admin_ids: HashSet<UserId>,
    pub call_token: char,
    pub homework: HomeworkLimits,
}

impl From<&Config> for DialogueConfig {
    fn from(config: &Config) -> Self {
        Self {
            curator_id: config.curator_id,
            admin_ids: config.admin_ids.clone(),
            call_token: config.call_token,
            homework: config.homework.clone(),
        }
    }
}

pub struct Assistant {
    store: Store,
    intake: Intake,
    support: Support,
    admins: Admins,
    admin: Admin,
    call_token: char,
}

impl Assistant {
    pub fn new(store: Store, transport: Arc<dyn Transport>, grader: Arc<dyn Grader>, config: DialogueConfig) -> Self {
        Self {
            intake: Intake::new(store.clone(), grader, config.homework),
            support: Support::new(store.clone(), transport.clone(), config.curator_id),
            admins: Admins::new(config.admin_ids),
            admin: Admin::new(store.clone(), transport),
            call_token: config.call_token,
            store,
        }
    }

    /// Handles one inbound event and returns the reply (empty when there is nothing to say).
    ///
    /// Course errors become user-facing text here. `Err` means the event couldn't even be
    /// recorded.
    pub async fn handle(&self, event: InboundEvent) -> Result<String> {
        self.store.insert_user(event.user, &event.display_name)?;
        self.store.record_activity(event.user)?;

        let user = self.store
            .query_user(event.user)?
            .with_context(|| format!("user {} vanished right after being recorded", event.user))?;
        let user = self.recover_state(user)?;

        let reply = match &event.content {
            InboundContent::Reply { to, text } if event.user == self.support.curator() => {
                match self.support.curator_reply(event.user, *to, text).await {
                    Ok(Some(_)) => Ok(String::from("✅ Answer sent to the student.")),
                    Ok(None) => self.route_text(&user, text).await,
                    Err(err) => Err(err),
                }
            }
            InboundContent::Reply { text, .. } | InboundContent::Text(text) => self.route_text(&user, text).await,
            InboundContent::Document { name, size, reference } => {
                let file = HomeworkContent::File { name: name.clone(), size: *size, reference: reference.clone() };
                self.route_document(&user, file).await
            }
            InboundContent::Command { name, args } => {
                let cmd = CommandInstance { assistant: self, user: &user, command: name, args };
                cmd.run().await
            }
        };

        Ok(reply.unwrap_or_else(|err| self.report(user.id, err)))
    }

    /// A stored state that contradicts the enrollment is reset to what the enrollment says.
    fn recover_state(&self, mut user: User) -> CourseResult<User> {
        let enrolled = self.store.query_enrollment(user.id)?.is_some();

        let recovered = match (enrolled, user.state.is_authenticated()) {
            (true, false) => UserState::Idle,
            (false, true) => UserState::NoAuth,
            _ => return Ok(user),
        };

        log::warn!("[recover_state] {} was in {} (enrolled: {enrolled}), resetting to {recovered}", user.id, user.state);
        self.store.update_user_state(user.id, &recovered)?;
        user.state = recovered;
        Ok(user)
    }

    fn set_state(&self, user: &User, next: UserState) -> CourseResult<()> {
        if !user.state.can_transition_to(&next) {
            log::warn!("[set_state] refused {} -> {next} for {}", user.state, user.id);
            return Err(CourseError::InvalidTransition { from: user.state, to: next });
        }

        self.store.update_user_state(user.id, &next)?;
        Ok(())
    }

    fn report(&self, user: UserId, err: CourseError) -> String {
        match err.kind() {
            ErrorKind::UserInput | ErrorKind::RateLimit => log::debug!("[handle] {user}: {err}"),
            ErrorKind::NotFound => log::info!("[handle] {user}: {err}"),
            ErrorKind::TransientDependency => log::warn!("[handle] {user}: {err}"),
            ErrorKind::InvariantViolation | ErrorKind::Internal => log::error!("[handle] {user}: {err}"),
        }

        err.user_message()
    }

    async fn route_text(&self, user: &User, text: &str) -> CourseResult<String> {
        let t = self.call_token;

        match user.state {
            UserState::NoAuth => Ok(format!(
                "Welcome! This course is open to students with an access code.\n\
                 Send `{t}start` to begin, or `{t}code <your code>`."
            )),
            UserState::WaitingCode => self.redeem(user, text),
            UserState::WaitingHomework { lesson } => {
                let lesson = self.homework_lesson(lesson)?;
                let content = match lesson.homework {
                    Some(HomeworkKind::VideoLink) => HomeworkContent::Link(text.to_string()),
                    _ => HomeworkContent::Text(text.to_string()),
                };
                self.submit(user, &lesson, content).await
            }
            UserState::Processing { .. } => Ok(String::from(
                "⏳ Still checking your previous answer, hang on a moment.",
            )),
            UserState::WaitingQuestion { lesson } => self.ask(user, lesson, text).await,
            UserState::Idle | UserState::ViewingLesson { .. } => Ok(format!(
                "I'm not sure what to do with that. Send `{t}menu` to see what you can do."
            )),
        }
    }

    async fn route_document(&self, user: &User, file: HomeworkContent) -> CourseResult<String> {
        match user.state {
            UserState::WaitingHomework { lesson } => {
                let lesson = self.homework_lesson(lesson)?;
                self.submit(user, &lesson, file).await
            }
            UserState::WaitingQuestion { lesson } => {
                let HomeworkContent::File { name, reference, .. } = &file else {
                    return Err(CourseError::UnsupportedFile);
                };
                self.ask(user, lesson, &format!("📎 {name} ({reference})")).await
            }
            _ => Ok(String::from("I wasn't expecting a file right now.")),
        }
    }

    fn homework_lesson(&self, lesson: LessonId) -> CourseResult<Lesson> {
        self.store.query_lesson(lesson)?.ok_or(CourseError::NotFound("Lesson"))
    }

    fn redeem(&self, user: &User, code: &str) -> CourseResult<String> {
        gate::redeem(&self.store, code, user.id, &user.display_name)?;
        Ok(format!(
            "🎉 Code accepted, welcome to the course, {}!\n\nSend `{}lesson` to open your first lesson.",
            user.display_name, self.call_token
        ))
    }

    async fn submit(&self, user: &User, lesson: &Lesson, content: HomeworkContent) -> CourseResult<String> {
        let waiting = UserState::WaitingHomework { lesson: lesson.id };
        self.set_state(user, UserState::Processing { lesson: lesson.id })?;
        let processing = User { state: UserState::Processing { lesson: lesson.id }, ..user.clone() };

        match self.intake.submit(user.id, lesson.id, content).await {
            Ok(verdict) if verdict.is_accepted() => {
                self.set_state(&processing, UserState::Idle)?;
                Ok(format!("✅ {}\n\n{}", verdict.message, self.completion_note(lesson)?))
            }
            Ok(Verdict { message, .. }) => {
                self.set_state(&processing, waiting)?;
                Ok(format!("✏️ {message}\n\nGive it another go:"))
            }
            Err(err) => {
                // Problems with the answer itself keep the student in the homework prompt.
                let next = match err {
                    CourseError::TooShort { .. }
                    | CourseError::NotAVideoLink
                    | CourseError::UnsupportedFile
                    | CourseError::FileTooSmall
                    | CourseError::FileTooLarge { .. }
                    | CourseError::WrongFormat { .. }
                    | CourseError::GradingUnavailable(_) => waiting,
                    _ => UserState::Idle,
                };
                self.set_state(&processing, next)?;
                Err(err)
            }
        }
    }

    async fn ask(&self, user: &User, lesson: Option<LessonId>, question: &str) -> CourseResult<String> {
        let asked = self.support.ask(user, lesson, question).await;
        self.set_state(user, UserState::Idle)?;
        asked?;

        Ok(String::from("✅ Your question has been sent to the curator. The answer will arrive in this chat."))
    }

    fn completion_note(&self, lesson: &Lesson) -> CourseResult<String> {
        Ok(match self.store.query_lesson_by_order(lesson.order + 1)? {
            Some(_) => format!("Lesson {} is complete! The next lesson opens in a day.", lesson.order),
            None => String::from("🎉 That was the last lesson. Congratulations on finishing the course!"),
        })
    }
}

struct CommandInstance<'a> {
    assistant: &'a Assistant,
    user: &'a User,
    command: &'a str,
    args: &'a str,
}

impl CommandInstance<'_> {
    async fn run(&self) -> CourseResult<String> {
        match self.command {
            "start" => self.start(),
            "code" => self.code(),
            "help" => Ok(self.help()),
            "menu" => self.menu("📋 Main menu"),
            "cancel" => self.menu("Cancelled."),
            "lesson" => self.lesson(),
            "progress" => self.progress(),
            "submit" => self.submit(),
            "done" => self.done(),
            "ask" => self.ask(),
            "add_code" => self.add_code(),
            "force_accept" => self.force_accept(),
            "unlock_all" => self.unlock_all(),
            "stat" => self.stat(),
            "users" => self.users(),
            "broadcast" => self.broadcast().await,
            command => {
                let t = self.assistant.call_token;
                if is_valid_cmd(command) {
                    log::info!("User submitted unknown command: {command}");
                    Ok(format!("No such command: {command}, see `{t}help` for commands."))
                } else {
                    log::info!("User submitted invalid command: {command}");
                    Ok(String::from("Invalid command syntax."))
                }
            }
        }
    }

    fn store(&self) -> &Store {
        &self.assistant.store
    }

    fn require_enrolled(&self) -> CourseResult<()> {
        if self.user.state.is_authenticated() {
            Ok(())
        } else {
            Err(CourseError::NotEnrolled)
        }
    }

    /// The lesson a command refers to: an explicit order number, the lesson the user is
    /// looking at, or their current one.
    fn target_lesson(&self) -> CourseResult<Lesson> {
        if let Some(order) = self.args.split_whitespace().next() {
            let order = order.parse::<u32>().map_err(|_| CourseError::NotFound("Lesson"))?;
            return lessons::open_lesson(self.store(), self.user.id, order);
        }

        match self.user.state.lesson() {
            Some(lesson) => self.store().query_lesson(lesson)?.ok_or(CourseError::NotFound("Lesson")),
            None => lessons::current_lesson(self.store(), self.user.id),
        }
    }

    fn start(&self) -> CourseResult<String> {
        let t = self.assistant.call_token;

        if self.user.state.is_authenticated() {
            self.assistant.set_state(self.user, UserState::Idle)?;
            return Ok(format!("Welcome back, {}! Send `{t}menu` to see what you can do.", self.user.display_name));
        }

        self.assistant.set_state(self.user, UserState::WaitingCode)?;
        Ok(String::from(
            "Welcome to the course! 👋\n\nTo get access to the lessons, send your access code as the next message.",
        ))
    }

    fn code(&self) -> CourseResult<String> {
        if self.args.is_empty() {
            if self.user.state.is_authenticated() {
                return Err(CourseError::AlreadyEnrolled);
            }
            self.assistant.set_state(self.user, UserState::WaitingCode)?;
            return Ok(String::from("Send your access code as the next message."));
        }

        self.assistant.redeem(self.user, self.args)
    }

    fn menu(&self, title: &str) -> CourseResult<String> {
        self.require_enrolled()?;
        self.assistant.set_state(self.user, UserState::Idle)?;

        let t = self.assistant.call_token;
        Ok(format!(
            "{title}\n\
             `{t}lesson`: open your current lesson\n\
             `{t}progress`: see how far you've come\n\
             `{t}ask`: write to the curator\n\
             `{t}help`: all commands"
        ))
    }

    fn lesson(&self) -> CourseResult<String> {
        self.require_enrolled()?;
        let lesson = match self.args.split_whitespace().next() {
            Some(_) => self.target_lesson()?,
            None => lessons::current_lesson(self.store(), self.user.id)?,
        };
        self.assistant.set_state(self.user, UserState::ViewingLesson { lesson: lesson.id })?;

        let t = self.assistant.call_token;
        let hint = if lesson.requires_homework() {
            format!("Send `{t}submit` when you're ready to hand in your homework, or `{t}ask` to ask the curator.")
        } else {
            format!("Send `{t}done` once you've studied it, or `{t}ask` to ask the curator.")
        };

        Ok(format!("{lesson}\n\n{hint}"))
    }

    fn progress(&self) -> CourseResult<String> {
        self.require_enrolled()?;
        Ok(lessons::progress_report(self.store(), self.user.id)?.to_string())
    }

    fn submit(&self) -> CourseResult<String> {
        self.require_enrolled()?;
        let lesson = self.target_lesson()?;
        let lesson = self.assistant.intake.check_ready(self.user.id, lesson.id)?;
        self.assistant.set_state(self.user, UserState::WaitingHomework { lesson: lesson.id })?;

        let task = lesson.body.as_deref().map(|body| format!("📝 Task:\n{body}\n\n")).unwrap_or_default();
        let kind = lesson.homework.ok_or(CourseError::NoHomework)?;
        Ok(format!("{task}Send {} as your next message.", kind.instruction()))
    }

    fn done(&self) -> CourseResult<String> {
        self.require_enrolled()?;
        let lesson = self.target_lesson()?;

        if !lessons::mark_done(self.store(), self.user.id, &lesson)? {
            return Ok(String::from("You've already completed this lesson."));
        }
        self.assistant.set_state(self.user, UserState::Idle)?;
        self.assistant.completion_note(&lesson)
    }

    fn ask(&self) -> CourseResult<String> {
        self.require_enrolled()?;
        self.assistant.set_state(self.user, UserState::WaitingQuestion { lesson: self.user.state.lesson() })?;

        Ok(format!(
            "Write your question for the curator as the next message. Send `{}cancel` to go back.",
            self.assistant.call_token
        ))
    }

    fn add_code(&self) -> CourseResult<String> {
        let cap = self.assistant.admins.authorize(self.user.id)?;
        let requested = self.args.split_whitespace().next();
        let code = self.assistant.admin.issue_code(&cap, requested)?;
        Ok(format!("New access code: `{code}`"))
    }

    fn force_accept(&self) -> CourseResult<String> {
        let cap = self.assistant.admins.authorize(self.user.id)?;
        let (student, order) = self.student_and_order()?;

        Ok(if self.assistant.admin.force_complete(&cap, student, order)? {
            format!("Lesson {order} is now completed for {student}.")
        } else {
            format!("Lesson {order} was already completed for {student}.")
        })
    }

    fn unlock_all(&self) -> CourseResult<String> {
        let cap = self.assistant.admins.authorize(self.user.id)?;
        let (student, _) = self.student_and_order()?;

        let opened = self.assistant.admin.open_all(&cap, student)?;
        Ok(format!("Opened {opened} lesson(s) for {student}."))
    }

    fn stat(&self) -> CourseResult<String> {
        let cap = self.assistant.admins.authorize(self.user.id)?;
        Ok(self.assistant.admin.stats(&cap)?.to_string())
    }

    fn users(&self) -> CourseResult<String> {
        let cap = self.assistant.admins.authorize(self.user.id)?;
        Ok(admin::format_users(&self.assistant.admin.list_users(&cap)?))
    }

    async fn broadcast(&self) -> CourseResult<String> {
        let cap = self.assistant.admins.authorize(self.user.id)?;
        if self.args.is_empty() {
            return Ok(format!("Expected usage: `{}broadcast <message>`", self.assistant.call_token));
        }

        let report = self.assistant.admin.broadcast(&cap, self.args).await?;
        Ok(format!("Broadcast delivered to {} student(s), {} failed.", report.delivered, report.failed))
    }

    /// Parses `<user id> [lesson order]` from the arguments.
    fn student_and_order(&self) -> CourseResult<(UserId, u32)> {
        let mut args = self.args.split_whitespace();
        let student = args
            .next()
            .and_then(|id| id.parse::<UserId>().ok())
            .ok_or(CourseError::NotFound("Student"))?;
        let order = match args.next() {
            Some(order) => order.parse::<u32>().map_err(|_| CourseError::NotFound("Lesson"))?,
            None => 0,
        };

        Ok((student, order))
    }

    /// Gets a help string. Should be updated after a new command is added
    fn help(&self) -> String {
        let t = self.assistant.call_token;
        let mut help = format!(
            r#"
**Command List:**
`{t}start`:  Start the bot, or get back to it.
`{t}code <code>`:  Activate your access code.
`{t}lesson [n]`:  Open your current lesson, or lesson number n.
`{t}progress`:  See which lessons you've completed.
`{t}submit [n]`:  Hand in homework for the lesson you're looking at.
`{t}done [n]`:  Mark a lesson without homework as studied.
`{t}ask`:  Send a question to the curator.
`{t}cancel`:  Stop what you're doing and go back to the menu.
`{t}help`:  Get information on supported commands
"#
        );

        if self.assistant.admins.authorize(self.user.id).is_ok() {
            help += &format!(
                r#"
**Admin:**
`{t}add_code [code]`:  Create an access code.
`{t}force_accept <user id> <n>`:  Complete lesson n for a student.
`{t}unlock_all <user id>`:  Open every lesson for a student.
`{t}stat`:  Course statistics.
`{t}users`:  List enrolled students.
`{t}broadcast <message>`:  Message every enrolled student.
"#
            );
        }

        help
    }
}

/// Ensures that the string slice conforms to C-like identifier regex
fn is_valid_cmd(s: &str) -> bool {
    s.len() <= MAX_CMD_LENGTH && COMMAND.is_match(s)
}
