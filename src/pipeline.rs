use std::fmt;
use std::rc::Rc;

/// Something that can be evaluated to a string at launch time.
///
/// Argument evaluation happens inside the forked worker, after it has
/// joined the pipeline's process group but before `execvp`, so a
/// pathological expression only takes down the one worker that evaluates
/// it rather than the whole pipeline. Kept as a trait so this crate
/// doesn't need to know about any particular expander or variable store.
pub trait Evaluate {
    fn eval(&self) -> String;
}

/// A plain string argument; the common case, needing no variable lookup.
#[derive(Debug, Clone)]
pub struct Literal(pub String);

impl Evaluate for Literal {
    fn eval(&self) -> String {
        self.0.clone()
    }
}

/// One argument of a [`Command`], either a literal or an expression to
/// evaluate at launch time.
#[derive(Clone)]
pub enum Arg {
    Literal(String),
    Expr(Rc<dyn Evaluate>),
}

impl Arg {
    pub fn literal(s: impl Into<String>) -> Self {
        Arg::Literal(s.into())
    }

    pub fn expr(e: Rc<dyn Evaluate>) -> Self {
        Arg::Expr(e)
    }

    pub fn eval(&self) -> String {
        match self {
            Arg::Literal(s) => s.clone(),
            Arg::Expr(e) => e.eval(),
        }
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Literal(s) => write!(f, "Arg::Literal({s:?})"),
            Arg::Expr(_) => write!(f, "Arg::Expr(<evaluable>)"),
        }
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Literal(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Literal(s)
    }
}

/// One program invocation within a pipeline: an ordered argument vector
/// whose first evaluated element is the program to execute.
#[derive(Debug, Clone)]
pub struct Command {
    pub args: Vec<Arg>,
}

impl Command {
    pub fn new(args: Vec<Arg>) -> Self {
        Self { args }
    }

    /// Convenience constructor from plain string literals.
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: words.into_iter().map(|w| Arg::Literal(w.into())).collect(),
        }
    }
}

/// An immutable description of a pipeline: an ordered, non-empty sequence
/// of commands plus optional input/output redirection and a capture flag.
///
/// `Clone` satisfies the deep-copy requirement in the spec: a cloned
/// pipeline shares no mutable state with its source (the `Rc<dyn
/// Evaluate>` inside an `Arg::Expr` is immutable by contract, so bumping
/// its refcount does not let the original caller observe or mutate the
/// job's copy).
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub commands: Vec<Command>,
    pub input_file: Option<String>,
    pub output_file: Option<String>,
    pub capture_output: bool,
}

impl Pipeline {
    pub fn new(commands: Vec<Command>) -> Self {
        Self {
            commands,
            input_file: None,
            output_file: None,
            capture_output: false,
        }
    }

    pub fn with_input_file(mut self, path: impl Into<String>) -> Self {
        self.input_file = Some(path.into());
        self
    }

    pub fn with_output_file(mut self, path: impl Into<String>) -> Self {
        self.output_file = Some(path.into());
        self
    }

    pub fn with_capture_output(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Render the pipeline as `cmd1 arg | cmd2 arg` with redirections
    /// appended, evaluating each argument expression via `eval()`.
    ///
    /// A launched job never calls this more than once (its job record
    /// caches the rendering taken at launch time instead); this method
    /// is for rendering a `Pipeline` value directly, before or outside
    /// of `run`, where repeated evaluation and its side effects are the
    /// caller's own business.
    pub fn pretty_print(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        for (i, cmd) in self.commands.iter().enumerate() {
            if i > 0 {
                write!(out, " | ")?;
            }
            for (j, arg) in cmd.args.iter().enumerate() {
                if j > 0 {
                    write!(out, " ")?;
                }
                write!(out, "{}", arg.eval())?;
            }
        }
        if let Some(input) = &self.input_file {
            write!(out, " < {input}")?;
        }
        if let Some(output) = &self.output_file {
            write!(out, " > {output}")?;
        } else if self.capture_output {
            write!(out, " (captured)")?;
        }
        Ok(())
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.pretty_print(f)
    }
}
