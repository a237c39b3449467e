use std::{
    io::Read,
    path::PathBuf,
    process::{Child, Command, Stdio},
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

use crate::{
    config::{DataConfig, GeneratorConfig, LINE_PLACEHOLDER},
    error::GenerationError,
};

const POLL_INTERVAL: Duration = Duration::from_millis(25);
/// How long stderr may stay open after the child has exited.
const STDERR_GRACE: Duration = Duration::from_secs(2);

/// Capability that materialises the temporal dataset of a production line.
///
/// Implementations block until the data is written (or generation fails) and
/// return the path they wrote.
pub trait DataProducer {
    /// Generates the temporal dataset for `production_line`.
    fn generate(&self, production_line: i64) -> Result<PathBuf, GenerationError>;
}

impl<F> DataProducer for F
where
    F: Fn(i64) -> Result<PathBuf, GenerationError>,
{
    fn generate(&self, production_line: i64) -> Result<PathBuf, GenerationError> {
        self(production_line)
    }
}

/// Runs an external program and waits for it, with an optional deadline.
#[derive(Debug, Clone)]
pub struct CommandProducer {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
    data: DataConfig,
}

impl CommandProducer {
    /// Creates a producer from configuration. A zero timeout waits forever.
    #[must_use]
    pub fn new(generator: &GeneratorConfig, data: &DataConfig) -> Self {
        Self {
            program: generator.program.clone(),
            args: generator.args.clone(),
            working_dir: generator.working_dir.clone(),
            timeout: (generator.timeout_secs > 0)
                .then(|| Duration::from_secs(generator.timeout_secs)),
            data: data.clone(),
        }
    }

    /// Arguments with the line placeholder substituted.
    #[must_use]
    pub fn render_args(&self, production_line: i64) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(LINE_PLACEHOLDER, &production_line.to_string()))
            .collect()
    }

    fn launch_error(&self, source: std::io::Error) -> GenerationError {
        GenerationError::Launch {
            program: self.program.clone(),
            source,
        }
    }

    fn wait(&self, child: &mut Child) -> Result<std::process::ExitStatus, GenerationError> {
        let started = Instant::now();
        loop {
            if let Some(status) = child.try_wait().map_err(|err| self.launch_error(err))? {
                return Ok(status);
            }
            if let Some(limit) = self.timeout {
                if started.elapsed() >= limit {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(GenerationError::TimedOut {
                        secs: limit.as_secs(),
                    });
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl DataProducer for CommandProducer {
    fn generate(&self, production_line: i64) -> Result<PathBuf, GenerationError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.render_args(production_line))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        let mut child = cmd.spawn().map_err(|err| self.launch_error(err))?;

        // A full stderr pipe blocks the child, so drain it concurrently. Any
        // grandchild holding the pipe keeps the reader alive, so it is never joined.
        let stderr_rx = child.stderr.take().map(|mut pipe| {
            let (tx, rx) = mpsc::channel();
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = pipe.read_to_string(&mut buf);
                let _ = tx.send(buf);
            });
            rx
        });

        let status = self.wait(&mut child)?;
        let stderr = stderr_rx
            .and_then(|rx| rx.recv_timeout(STDERR_GRACE).ok())
            .unwrap_or_default();

        if status.success() {
            Ok(self.data.path_for(production_line, true))
        } else {
            Err(GenerationError::Failed {
                code: status.code(),
                stderr: stderr.trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn producer(program: &str, args: &[&str], timeout_secs: u64) -> CommandProducer {
        let generator = GeneratorConfig {
            program: program.into(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
            working_dir: None,
            timeout_secs,
        };
        CommandProducer::new(&generator, &DataConfig::default())
    }

    #[test]
    fn substitutes_line_placeholder() {
        let producer = producer("python", &["gen.py", "--production_line", "{line}"], 0);
        assert_eq!(
            producer.render_args(3),
            vec!["gen.py", "--production_line", "3"]
        );
    }

    #[test]
    fn closures_act_as_producers() {
        let fake = |line: i64| Ok::<_, GenerationError>(PathBuf::from(format!("line-{line}.csv")));
        assert_eq!(fake.generate(2).unwrap(), PathBuf::from("line-2.csv"));
    }

    #[test]
    fn missing_program_is_a_launch_error() {
        let producer = producer("/nonexistent/linefault-generator", &[], 5);
        let err = producer.generate(1).unwrap_err();
        assert!(matches!(err, GenerationError::Launch { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_carries_code_and_stderr() {
        let producer = producer("sh", &["-c", "echo 'bad line {line}' >&2; exit 3"], 5);
        match producer.generate(4).unwrap_err() {
            GenerationError::Failed { code, stderr } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "bad line 4");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn success_returns_canonical_temporal_path() {
        let producer = producer("sh", &["-c", "exit 0"], 5);
        let path = producer.generate(2).unwrap();
        assert_eq!(path, DataConfig::default().path_for(2, true));
    }

    #[cfg(unix)]
    #[test]
    fn hung_generator_times_out() {
        let producer = producer("sh", &["-c", "exec sleep 5"], 1);
        let err = producer.generate(1).unwrap_err();
        assert!(matches!(err, GenerationError::TimedOut { secs: 1 }));
    }

    #[cfg(unix)]
    #[test]
    fn background_worker_does_not_extend_the_deadline() {
        let producer = producer("sh", &["-c", "sleep 20 & sleep 20"], 1);
        let started = Instant::now();
        let err = producer.generate(1).unwrap_err();
        assert!(matches!(err, GenerationError::TimedOut { secs: 1 }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn finished_generator_with_lingering_worker_still_reports() {
        let producer = producer("sh", &["-c", "sleep 20 & echo 'worker crashed' >&2; exit 2"], 30);
        let started = Instant::now();
        match producer.generate(1).unwrap_err() {
            GenerationError::Failed { code, .. } => assert_eq!(code, Some(2)),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
