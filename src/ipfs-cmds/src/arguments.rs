//! Positional argument descriptors.

/// What a positional argument binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    String,
    File,
}

/// How a String argument falls back to the request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StdinMode {
    /// One argument value per line.
    Lines,
    /// The whole body is a single value.
    Blob,
}

/// Declaration of a positional argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentDef {
    pub name: &'static str,
    pub kind: ArgKind,
    pub required: bool,
    pub variadic: bool,
    pub description: &'static str,
    /// Fallback to the request body when the argument is missing.
    pub stdin: Option<StdinMode>,
    /// Directory paths may be walked.
    pub recursive: bool,
    /// Values may carry arbitrary bytes and travel multibase encoded.
    pub binary: bool,
}

impl ArgumentDef {
    fn new(name: &'static str, kind: ArgKind, required: bool, variadic: bool, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required,
            variadic,
            description,
            stdin: None,
            recursive: false,
            binary: false,
        }
    }

    /// A string argument.
    pub fn string(name: &'static str, required: bool, variadic: bool, description: &'static str) -> Self {
        Self::new(name, ArgKind::String, required, variadic, description)
    }

    /// A file argument.
    pub fn file(name: &'static str, required: bool, variadic: bool, description: &'static str) -> Self {
        Self::new(name, ArgKind::File, required, variadic, description)
    }

    /// Read missing values from the body, one per line.
    pub fn enable_stdin(mut self) -> Self {
        self.stdin = Some(StdinMode::Lines);
        self
    }

    /// Read a missing value from the body as a single blob.
    pub fn enable_stdin_blob(mut self) -> Self {
        self.stdin = Some(StdinMode::Blob);
        self
    }

    pub fn enable_recursive(mut self) -> Self {
        self.recursive = true;
        self
    }

    pub fn binary(mut self) -> Self {
        self.binary = true;
        self
    }

    /// Synopsis fragment, e.g. `<ipfs-path>...` or `[<key>]`.
    pub fn synopsis(&self) -> String {
        let mut s = format!("<{}>", self.name);
        if self.variadic {
            s.push_str("...");
        }
        if !self.required {
            s = format!("[{s}]");
        }
        s
    }
}
