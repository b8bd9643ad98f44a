// File matching
// Runs a compiled pattern over every record of an input stream. Records are
// lines without their terminator, or the whole input in wholefile mode.
// Matches go to the output stream, each followed by a newline; records that
// do not match are copied to the error stream.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};

use tracing::debug;

use crate::dispatch;
use crate::encoder::Encoder;
use crate::engine::EngineState;
use crate::error::{Result, RosieError};
use crate::handle_table::PatternHandle;

/// Records matched between two runs of the allocation governor.
pub(crate) const GOVERN_INTERVAL: u64 = 256;

/// Arguments of [`Engine::matchfile`](crate::Engine::matchfile). Empty paths
/// select stdin, stdout and stderr.
#[derive(Debug, Clone, Copy)]
pub struct FileMatchRequest<'a> {
    pub pattern: PatternHandle,
    pub encoder: &'a str,
    pub input: &'a str,
    pub output: &'a str,
    pub errors: &'a str,
    pub wholefile: bool,
}

impl<'a> FileMatchRequest<'a> {
    /// Line mode over stdio.
    pub fn new(pattern: PatternHandle, encoder: &'a str) -> Self {
        FileMatchRequest {
            pattern,
            encoder,
            input: "",
            output: "",
            errors: "",
            wholefile: false,
        }
    }

    pub fn with_input(mut self, path: &'a str) -> Self {
        self.input = path;
        self
    }

    pub fn with_output(mut self, path: &'a str) -> Self {
        self.output = path;
        self
    }

    pub fn with_errors(mut self, path: &'a str) -> Self {
        self.errors = path;
        self
    }

    pub fn with_wholefile(mut self, wholefile: bool) -> Self {
        self.wholefile = wholefile;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileMatch {
    Counts { cin: u64, cout: u64, cerr: u64 },
    NoSuchPattern,
    InvalidEncoder,
    /// Opening, reading or writing one of the streams failed.
    Io(String),
}

enum Failure {
    Io(String),
    Engine(RosieError),
}

impl From<RosieError> for Failure {
    fn from(e: RosieError) -> Self {
        Failure::Engine(e)
    }
}

fn io_failure(path: &str, role: &str) -> impl FnOnce(io::Error) -> Failure {
    let name = if path.is_empty() {
        role.to_string()
    } else {
        path.to_string()
    };
    move |e| Failure::Io(format!("{name}: {e}"))
}

fn open_input(path: &str) -> std::result::Result<Box<dyn BufRead>, Failure> {
    if path.is_empty() {
        return Ok(Box::new(io::stdin().lock()));
    }
    let file = File::open(path).map_err(io_failure(path, "stdin"))?;
    Ok(Box::new(BufReader::new(file)))
}

fn open_output(path: &str, stdio: fn() -> Box<dyn Write>) -> std::result::Result<Box<dyn Write>, Failure> {
    if path.is_empty() {
        return Ok(stdio());
    }
    let file = File::create(path).map_err(io_failure(path, "output"))?;
    Ok(Box::new(BufWriter::new(file)))
}

pub(crate) fn run(state: &mut EngineState, request: &FileMatchRequest<'_>) -> Result<FileMatch> {
    if state.slots.patterns.get(request.pattern).is_none() {
        return Ok(FileMatch::NoSuchPattern);
    }
    if let Encoder::Extension(name) = Encoder::resolve(request.encoder) {
        if !state.slots.has_extension_encoder(&mut state.vm, name)? {
            return Ok(FileMatch::InvalidEncoder);
        }
    }
    match process(state, request) {
        Ok(counts) => Ok(counts),
        Err(Failure::Io(message)) => {
            debug!(%message, "matchfile stopped");
            Ok(FileMatch::Io(message))
        }
        Err(Failure::Engine(e)) => Err(e),
    }
}

fn process(
    state: &mut EngineState,
    request: &FileMatchRequest<'_>,
) -> std::result::Result<FileMatch, Failure> {
    let mut input = open_input(request.input)?;
    let mut output = open_output(request.output, || Box::new(io::stdout().lock()))?;
    let mut errors = open_output(request.errors, || Box::new(io::stderr().lock()))?;
    let read_failed = || io_failure(request.input, "stdin");
    let output_failed = || io_failure(request.output, "stdout");
    let errors_failed = || io_failure(request.errors, "stderr");

    let (mut cin, mut cout, mut cerr) = (0u64, 0u64, 0u64);
    let mut record = Vec::new();
    loop {
        record.clear();
        let read = if request.wholefile {
            input.read_to_end(&mut record)
        } else {
            input.read_until(b'\n', &mut record)
        }
        .map_err(read_failed())?;
        if read == 0 {
            break;
        }
        if !request.wholefile && record.last() == Some(&b'\n') {
            record.pop();
        }
        cin += 1;
        if cin % GOVERN_INTERVAL == 0 {
            state.govern()?;
        }

        let outcome = dispatch::dispatch(state, request.pattern, 1, request.encoder, &record)?;
        match state.data(outcome.data) {
            Some(encoded) => {
                output
                    .write_all(encoded)
                    .and_then(|()| output.write_all(b"\n"))
                    .map_err(output_failed())?;
                cout += 1;
            }
            None => {
                errors
                    .write_all(&record)
                    .and_then(|()| errors.write_all(b"\n"))
                    .map_err(errors_failed())?;
                cerr += 1;
            }
        }
        if request.wholefile {
            break;
        }
    }
    output.flush().map_err(output_failed())?;
    errors.flush().map_err(errors_failed())?;

    debug!(cin, cout, cerr, wholefile = request.wholefile, "matchfile done");
    Ok(FileMatch::Counts { cin, cout, cerr })
}
