//! Shell command lines.
//!
//! Both the registration invocation and the start command take the form
//! `export K=V && … && program args…`. Values are shell-quoted unless added
//! through a `raw_*` method, which is reserved for fixed text that relies on
//! shell expansion such as `$PORT`.

use std::borrow::Cow;

/// One word of a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Word {
    /// Passed to the program exactly as given
    Literal(String),
    /// Emitted verbatim for the shell to expand
    Raw(String),
}

impl Word {
    fn as_str(&self) -> &str {
        match self {
            Self::Literal(s) | Self::Raw(s) => s,
        }
    }

    fn render(&self) -> Cow<'_, str> {
        match self {
            Self::Literal(s) => quote(s),
            Self::Raw(s) => Cow::Borrowed(s),
        }
    }
}

impl Default for Word {
    fn default() -> Self {
        Self::Literal(String::new())
    }
}

/// A shell command with leading environment exports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellCommand {
    exports: Vec<(String, Word)>,
    program: Word,
    args: Vec<Word>,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self::with_program(Word::Literal(program.into()))
    }

    /// Program path containing shell variables, e.g. `$MULE_HOME/bin/mule`.
    pub fn raw(program: impl Into<String>) -> Self {
        Self::with_program(Word::Raw(program.into()))
    }

    fn with_program(program: Word) -> Self {
        Self {
            exports: Vec::new(),
            program,
            args: Vec::new(),
        }
    }

    /// Export `key=value` before running the program. Exports are emitted in
    /// insertion order.
    pub fn export(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.exports.push((key.into(), Word::Literal(value.into())));
        self
    }

    /// Export a value the shell expands, e.g. `$JAVA_HOME/bin:$PATH`.
    pub fn raw_export(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.exports.push((key.into(), Word::Raw(value.into())));
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(Word::Literal(arg.into()));
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args
            .extend(args.into_iter().map(|a| Word::Literal(a.into())));
        self
    }

    /// Append fixed text verbatim.
    pub fn raw_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(Word::Raw(arg.into()));
        self
    }

    pub fn program(&self) -> &str {
        self.program.as_str()
    }

    /// Arguments as given, before quoting.
    pub fn arguments(&self) -> Vec<&str> {
        self.args.iter().map(Word::as_str).collect()
    }

    /// Ordered shell tokens, quoted.
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens = Vec::with_capacity(self.exports.len() * 3 + self.args.len() + 1);
        for (key, value) in &self.exports {
            tokens.push("export".to_string());
            tokens.push(format!("{}={}", key, value.render()));
            tokens.push("&&".to_string());
        }
        tokens.push(self.program.render().into_owned());
        tokens.extend(self.args.iter().map(|a| a.render().into_owned()));
        tokens
    }

    /// Single command line, tokens joined by spaces.
    pub fn render(&self) -> String {
        self.tokens().join(" ")
    }
}

impl std::fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// Prefix an operator-supplied command line with `export key=value &&`.
///
/// `command` is trusted shell text and is not quoted.
pub fn with_export(key: &str, value: &str, command: &str) -> String {
    format!("export {}={} && {}", key, quote(value), command)
}

/// Quote `word` for `sh`. NUL bytes cannot appear in a command line and are
/// dropped.
fn quote(word: &str) -> Cow<'_, str> {
    if word.contains('\0') {
        let cleaned = word.replace('\0', "");
        let quoted = shlex::try_quote(&cleaned)
            .map(Cow::into_owned)
            .unwrap_or_default();
        return Cow::Owned(quoted);
    }
    shlex::try_quote(word).unwrap_or(Cow::Borrowed(word))
}
