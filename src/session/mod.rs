//! Client/session management (spec.md §4.1).
//!
//! Grounded on the teacher's `dbs/session.rs` for the `Session` struct shape
//! and builder style, and on `dbs/node.rs` for the fixed-membership table
//! with a single coarse lock guarding slot transitions.

use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;

use crate::cnf;
use crate::err::Error;
use crate::frame::Frame;
use crate::ir::Block;

/// Lifecycle state of a session, per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
	Free = 0,
	Running = 1,
	Finishing = 2,
	Blocked = 3,
}

impl State {
	fn from_u8(v: u8) -> State {
		match v {
			0 => State::Free,
			1 => State::Running,
			2 => State::Finishing,
			_ => State::Blocked,
		}
	}
}

/// One saved input/prompt pair, used by `push_input`/`pop_input` for nested
/// `include`-style scripts.
struct PushedInput {
	input: Box<dyn Read + Send>,
	prompt: String,
}

/// A symbol namespace: the modules and IR functions a session may call.
/// Out of scope for this crate's concrete bodies (native library loading is
/// an external collaborator); we only track declared names.
#[derive(Default)]
pub struct Namespace {
	modules: Vec<String>,
}

impl Namespace {
	pub fn declare_module(&mut self, name: impl Into<String>) {
		self.modules.push(name.into());
	}

	pub fn has_module(&self, name: &str) -> bool {
		self.modules.iter().any(|m| m == name)
	}
}

/// Outcome of `Session::read`.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
	NoDataOnEof,
	OkMoreData,
	EofAndPopped,
}

/// One connected client (spec.md §3 "Session").
pub struct Session {
	pub id: u32,
	state: AtomicU8,
	parent: Option<Arc<Session>>,
	output_closed: AtomicBool,
	input_closed: AtomicBool,
	prompt: Mutex<String>,
	pushed: Mutex<Vec<PushedInput>>,
	namespace: RwLock<Namespace>,
	frame: Mutex<Option<Frame>>,
	start_time: i64,
	last_command_time: Mutex<i64>,
	query_timeout: Mutex<u64>,
	session_timeout: Mutex<u64>,
	error_buf: Mutex<Option<String>>,
}

impl Session {
	fn build(id: u32, parent: Option<Arc<Session>>) -> Session {
		let now = Utc::now().timestamp_micros();
		Session {
			id,
			state: AtomicU8::new(State::Free as u8),
			parent,
			output_closed: AtomicBool::new(false),
			input_closed: AtomicBool::new(false),
			prompt: Mutex::new(cnf::MONET_PROMPT.to_owned()),
			pushed: Mutex::new(Vec::new()),
			namespace: RwLock::new(Namespace::default()),
			frame: Mutex::new(None),
			start_time: now,
			last_command_time: Mutex::new(now),
			query_timeout: Mutex::new(*cnf::DEFAULT_QUERY_TIMEOUT_USEC),
			session_timeout: Mutex::new(*cnf::DEFAULT_SESSION_TIMEOUT_USEC),
			error_buf: Mutex::new(None),
		}
	}

	fn new(id: u32, parent: Option<Arc<Session>>) -> Arc<Session> {
		Arc::new(Session::build(id, parent))
	}

	/// A standalone session not tracked by any [`SessionTable`], used where an
	/// API needs a `&Session` but isn't driven by a real client connection —
	/// currently only the factory call-and-resume path (spec.md §4.2
	/// "factory-call"), which never participates in session liveness checks.
	pub fn detached() -> Session {
		Session::build(u32::MAX, None)
	}

	pub fn state(&self) -> State {
		State::from_u8(self.state.load(Ordering::SeqCst))
	}

	pub fn set_state(&self, s: State) {
		self.state.store(s as u8, Ordering::SeqCst);
	}

	pub fn is_child(&self) -> bool {
		self.parent.is_some()
	}

	pub fn input_closed(&self) -> bool {
		self.input_closed.load(Ordering::SeqCst)
	}

	pub fn output_closed(&self) -> bool {
		self.output_closed.load(Ordering::SeqCst)
	}

	pub fn close_output(&self) {
		self.output_closed.store(true, Ordering::SeqCst);
	}

	pub fn parent(&self) -> Option<&Arc<Session>> {
		self.parent.as_ref()
	}

	pub fn query_timeout(&self) -> u64 {
		*self.query_timeout.lock().unwrap()
	}

	pub fn set_query_timeout(&self, usec: u64) {
		*self.query_timeout.lock().unwrap() = usec;
	}

	pub fn session_timeout(&self) -> u64 {
		*self.session_timeout.lock().unwrap()
	}

	pub fn start_time(&self) -> i64 {
		self.start_time
	}

	pub fn touch(&self) {
		*self.last_command_time.lock().unwrap() = Utc::now().timestamp_micros();
	}

	pub fn take_frame(&self) -> Option<Frame> {
		self.frame.lock().unwrap().take()
	}

	pub fn install_frame(&self, frame: Frame) {
		*self.frame.lock().unwrap() = Some(frame);
	}

	pub fn set_error(&self, msg: Option<String>) {
		*self.error_buf.lock().unwrap() = msg;
	}

	pub fn error(&self) -> Option<String> {
		self.error_buf.lock().unwrap().clone()
	}

	/// Saves the current input/prompt and installs a new one, per spec.md
	/// §4.1 `push_input` (nested `include`-style scripts).
	pub fn push_input(&self, new_input: Box<dyn Read + Send>, new_prompt: impl Into<String>) {
		let old_prompt = {
			let mut p = self.prompt.lock().unwrap();
			std::mem::replace(&mut *p, new_prompt.into())
		};
		// The previously active input has already been consumed by the caller;
		// we only keep its prompt so pop_input can restore the banner. The
		// actual stream swap is the caller's responsibility since Read isn't
		// reconstructible from inside this call.
		self.pushed.lock().unwrap().push(PushedInput { input: new_input, prompt: old_prompt });
	}

	/// Restores the most recently pushed input, destroying the popped stream.
	pub fn pop_input(&self) -> bool {
		let popped = self.pushed.lock().unwrap().pop();
		match popped {
			Some(saved) => {
				*self.prompt.lock().unwrap() = saved.prompt;
				drop(saved.input);
				true
			}
			None => false,
		}
	}

	/// Reads and dispatches one logical unit of client input, per spec.md
	/// §4.1 `read`. Whitespace and `;` leaders are skipped; an empty buffer
	/// with no pending data falls through to EOF/pop handling.
	pub fn read_line(&self, buf: &str) -> ReadOutcome {
		let trimmed = buf.trim_start_matches(|c: char| c.is_whitespace() || c == ';');
		if !trimmed.is_empty() {
			return ReadOutcome::OkMoreData;
		}
		if self.pop_input() {
			return ReadOutcome::EofAndPopped;
		}
		ReadOutcome::NoDataOnEof
	}
}

/// Fixed-capacity table of client sessions (spec.md §4.1).
///
/// Slot 0 is always the console session. A single coarse lock guards every
/// state transition, mirroring the teacher's preference for one lock over a
/// fixed-membership table rather than per-slot locks.
pub struct SessionTable {
	slots: Mutex<Vec<Option<Arc<Session>>>>,
	shutdown_in_progress: AtomicBool,
	max_clients: usize,
}

impl SessionTable {
	/// *init(max_clients)*: allocates `1 + max_clients` slots; slot 0 is the console.
	pub fn init(max_clients: usize) -> Self {
		let mut slots = Vec::with_capacity(1 + max_clients);
		slots.push(Some(Session::new(0, None)));
		for _ in 0..max_clients {
			slots.push(None);
		}
		SessionTable { slots: Mutex::new(slots), shutdown_in_progress: AtomicBool::new(false), max_clients }
	}

	pub fn console(&self) -> Arc<Session> {
		self.slots.lock().unwrap()[0].clone().expect("console session always present")
	}

	/// *new_client(user_id, stdin, stdout) → session | nil*
	pub fn new_client(&self) -> Result<Arc<Session>, Error> {
		if self.shutdown_in_progress.load(Ordering::SeqCst) {
			return Err(Error::ShutdownInProgress);
		}
		let mut slots = self.slots.lock().unwrap();
		let free_idx = slots.iter().skip(1).position(|s| s.is_none()).map(|i| i + 1);
		match free_idx {
			Some(idx) => {
				let sess = Session::new(idx as u32, None);
				sess.set_state(State::Running);
				slots[idx] = Some(sess.clone());
				Ok(sess)
			}
			None => Err(Error::SessionTableFull),
		}
	}

	/// *fork(parent) → child*: shares the parent's output, closes the child's
	/// input, and re-parents to the grandparent if `parent` is itself a child.
	pub fn fork(&self, parent: &Arc<Session>) -> Result<Arc<Session>, Error> {
		if self.shutdown_in_progress.load(Ordering::SeqCst) {
			return Err(Error::ShutdownInProgress);
		}
		let effective_parent = parent.parent().cloned().unwrap_or_else(|| parent.clone());
		let mut slots = self.slots.lock().unwrap();
		let free_idx = slots.iter().skip(1).position(|s| s.is_none()).map(|i| i + 1);
		match free_idx {
			Some(idx) => {
				let child = Session::new(idx as u32, Some(effective_parent));
				child.input_closed.store(true, Ordering::SeqCst);
				child.set_state(State::Running);
				slots[idx] = Some(child.clone());
				Ok(child)
			}
			None => Err(Error::SessionTableFull),
		}
	}

	/// *stop_all(except)*: RUNNING→FINISHING, FREE→BLOCKED, and sets the
	/// shutdown flag.
	pub fn stop_all(&self, except: u32) {
		self.shutdown_in_progress.store(true, Ordering::SeqCst);
		let slots = self.slots.lock().unwrap();
		for slot in slots.iter().flatten() {
			if slot.id == except {
				continue;
			}
			match slot.state() {
				State::Running => slot.set_state(State::Finishing),
				State::Free => slot.set_state(State::Blocked),
				_ => {}
			}
		}
	}

	/// *close(session)*: administrator (slot 0) sets itself to FINISHING and
	/// signals exit; otherwise the slot returns to FREE, or BLOCKED if a
	/// shutdown is underway.
	pub fn close(&self, session_id: u32) -> Result<(), Error> {
		let mut slots = self.slots.lock().unwrap();
		if session_id == 0 {
			if let Some(console) = &slots[0] {
				console.set_state(State::Finishing);
			}
			return Ok(());
		}
		let idx = session_id as usize;
		let slot = slots.get(idx).and_then(|s| s.as_ref()).ok_or(Error::InvalidSessionId(session_id))?;
		if let Some(parent) = slot.parent() {
			let _ = parent;
		}
		let shutting_down = self.shutdown_in_progress.load(Ordering::SeqCst);
		if shutting_down {
			slot.set_state(State::Blocked);
		} else {
			slot.set_state(State::Free);
			slots[idx] = None;
		}
		Ok(())
	}

	/// Rejects destroying a session that has children attached through
	/// `parent`, enforcing "a child cannot destroy its parent" from the
	/// opposite direction: a parent destroy call from a child handle fails.
	pub fn close_as(&self, requester: &Arc<Session>, target: u32) -> Result<(), Error> {
		if let Some(parent) = requester.parent() {
			if parent.id == target {
				return Err(Error::ChildCannotDestroyParent);
			}
		}
		self.close(target)
	}

	/// *active_count() → int*: RUNNING + FINISHING.
	pub fn active_count(&self) -> usize {
		self.slots
			.lock()
			.unwrap()
			.iter()
			.flatten()
			.filter(|s| matches!(s.state(), State::Running | State::Finishing))
			.count()
	}

	pub fn get(&self, id: u32) -> Result<Arc<Session>, Error> {
		self.slots
			.lock()
			.unwrap()
			.get(id as usize)
			.and_then(|s| s.clone())
			.ok_or(Error::InvalidSessionId(id))
	}

	pub fn capacity(&self) -> usize {
		self.max_clients + 1
	}

	pub fn shutdown_in_progress(&self) -> bool {
		self.shutdown_in_progress.load(Ordering::SeqCst)
	}
}
