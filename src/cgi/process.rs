use crate::prelude::*;
use crate::router::CgiPlan;
use std::os::fd::OwnedFd;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::process::{Child, Command, Stdio};

use mio::net::UnixStream;

const STDIN_STAGE_SIZE: usize = 64 * 1024;

/// Where the child's stdin bytes come from: the in-memory body, or the
/// spill file when the body left memory.
#[derive(Debug)]
enum CgiInput {
    Memory { data: Vec<u8>, pos: usize },
    Spill { file: File, eof: bool },
}

/// One running CGI child and its three pipes, pumped from the main loop.
/// Output accumulates up to the ceiling; nothing here ever blocks.
#[derive(Debug)]
pub struct CgiDriver {
    pub child: Child,
    pub stdin: Option<UnixStream>,
    pub stdout: Option<UnixStream>,
    pub stderr: Option<UnixStream>,
    pub stdin_token: Option<Token>,
    pub stdout_token: Option<Token>,
    pub stderr_token: Option<Token>,
    input: CgiInput,
    staged: Vec<u8>,
    pub output: Vec<u8>,
    pub errors: Vec<u8>,
    pub started: Instant,
    pub timeout: Duration,
}

impl CgiDriver {
    /// Creates the three pipe pairs, forks and execs the script. The
    /// parent-side ends are non-blocking and ready for poll registration;
    /// the child ends close with the spawn call.
    pub fn spawn(plan: &CgiPlan, env: &HashMap<String, String>, body: &Body) -> io::Result<CgiDriver> {
        let (stdin_parent, stdin_child) = StdUnixStream::pair()?;
        let (stdout_parent, stdout_child) = StdUnixStream::pair()?;
        let (stderr_parent, stderr_child) = StdUnixStream::pair()?;

        stdin_parent.set_nonblocking(true)?;
        stdout_parent.set_nonblocking(true)?;
        stderr_parent.set_nonblocking(true)?;

        let (program, args) = exec_plan(plan)?;

        let mut command = Command::new(&program);
        command
            .args(&args)
            .env_clear()
            .envs(env)
            .stdin(Stdio::from(OwnedFd::from(stdin_child)))
            .stdout(Stdio::from(OwnedFd::from(stdout_child)))
            .stderr(Stdio::from(OwnedFd::from(stderr_child)));
        if let Some(dir) = plan.script.parent() {
            command.current_dir(dir);
        }

        let child = command.spawn()?;
        debug!(
            "cgi: spawned {} (pid {}) for {}",
            program.display(),
            child.id(),
            plan.script.display()
        );

        let input = match body.open_reader()? {
            BodyReader::Spill(file) => CgiInput::Spill { file, eof: false },
            BodyReader::Memory(cursor) => CgiInput::Memory {
                data: cursor.into_inner(),
                pos: 0,
            },
        };

        Ok(CgiDriver::assemble(
            child,
            stdin_parent,
            stdout_parent,
            stderr_parent,
            input,
            plan.timeout,
        ))
    }

    fn assemble(
        child: Child,
        stdin: StdUnixStream,
        stdout: StdUnixStream,
        stderr: StdUnixStream,
        input: CgiInput,
        timeout: Duration,
    ) -> CgiDriver {
        CgiDriver {
            child,
            stdin: Some(UnixStream::from_std(stdin)),
            stdout: Some(UnixStream::from_std(stdout)),
            stderr: Some(UnixStream::from_std(stderr)),
            stdin_token: None,
            stdout_token: None,
            stderr_token: None,
            input,
            staged: Vec::new(),
            output: Vec::new(),
            errors: Vec::new(),
            started: Instant::now(),
            timeout,
        }
    }

    pub fn has_input(&self) -> bool {
        match &self.input {
            CgiInput::Memory { data, pos } => *pos < data.len(),
            CgiInput::Spill { eof, .. } => !eof,
        }
    }

    /// Writes request-body bytes into the child's stdin until it would
    /// block. Returns true when everything has been written; the caller
    /// then closes the pipe so the child sees EOF.
    pub fn pump_stdin(&mut self) -> io::Result<bool> {
        loop {
            if self.staged.is_empty() {
                match &mut self.input {
                    CgiInput::Memory { data, pos } => {
                        if *pos >= data.len() {
                            return Ok(true);
                        }
                        let end = (*pos + STDIN_STAGE_SIZE).min(data.len());
                        self.staged.extend_from_slice(&data[*pos..end]);
                        *pos = end;
                    }
                    CgiInput::Spill { file, eof } => {
                        if *eof {
                            return Ok(true);
                        }
                        let mut chunk = vec![0u8; STDIN_STAGE_SIZE];
                        let n = file.read(&mut chunk)?;
                        if n == 0 {
                            *eof = true;
                            return Ok(true);
                        }
                        chunk.truncate(n);
                        self.staged = chunk;
                    }
                }
            }

            let stdin = match &mut self.stdin {
                Some(stdin) => stdin,
                None => return Ok(true),
            };

            match stdin.write(&self.staged) {
                Ok(n) => {
                    self.staged.drain(..n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                    // Child stopped reading; treat input as delivered.
                    return Ok(true);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drains the child's stdout into the accumulator. `Ok(true)` on EOF;
    /// exceeding the output ceiling is an error the caller turns into 500.
    pub fn pump_stdout(&mut self) -> io::Result<bool> {
        let stdout = match &mut self.stdout {
            Some(stdout) => stdout,
            None => return Ok(true),
        };

        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            match stdout.read(&mut buf) {
                Ok(0) => return Ok(true),
                Ok(n) => {
                    if self.output.len() + n > MAX_CGI_OUTPUT {
                        return Err(io::Error::new(
                            ErrorKind::OutOfMemory,
                            "cgi output ceiling exceeded",
                        ));
                    }
                    self.output.extend_from_slice(&buf[..n]);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(_) => return Ok(true),
            }
        }
    }

    /// Same for stderr; captured and logged, never sent to the client.
    pub fn pump_stderr(&mut self) -> io::Result<bool> {
        let stderr = match &mut self.stderr {
            Some(stderr) => stderr,
            None => return Ok(true),
        };

        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            match stderr.read(&mut buf) {
                Ok(0) => return Ok(true),
                Ok(n) => {
                    if self.errors.len() + n <= MAX_CGI_OUTPUT {
                        self.errors.extend_from_slice(&buf[..n]);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(_) => return Ok(true),
            }
        }
    }

    pub fn output_closed(&self) -> bool {
        self.stdout.is_none() && self.stderr.is_none()
    }

    pub fn timed_out(&self) -> bool {
        self.started.elapsed() > self.timeout
    }

    pub fn kill(&mut self) {
        let _ = self.child.kill();
    }
}

/// Picks the program and argv tail: a configured interpreter wins, then a
/// `#!` line, then direct execution of the script.
fn exec_plan(plan: &CgiPlan) -> io::Result<(PathBuf, Vec<PathBuf>)> {
    if let Some(interpreter) = &plan.interpreter {
        return Ok((interpreter.clone(), vec![plan.script.clone()]));
    }

    if let Some(interpreter) = read_shebang(&plan.script)? {
        return Ok((interpreter, vec![plan.script.clone()]));
    }

    let meta = fs::metadata(&plan.script)?;
    if meta.permissions().mode() & 0o111 == 0 {
        return Err(io::Error::new(
            ErrorKind::PermissionDenied,
            "script is not executable",
        ));
    }

    Ok((plan.script.clone(), Vec::new()))
}

fn read_shebang(script: &Path) -> io::Result<Option<PathBuf>> {
    let mut file = File::open(script)?;
    let mut buf = [0u8; 256];
    let n = file.read(&mut buf)?;
    let head = &buf[..n];

    if !head.starts_with(b"#!") {
        return Ok(None);
    }

    let line_end = head.iter().position(|&b| b == b'\n').unwrap_or(head.len());
    let line = String::from_utf8_lossy(&head[2..line_end]);
    let interpreter = line.split_whitespace().next().unwrap_or("");

    if interpreter.is_empty() {
        return Ok(None);
    }
    Ok(Some(PathBuf::from(interpreter)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::TempDir;

    #[test]
    fn test_read_shebang() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("hello.sh");
        let mut f = File::create(&script).unwrap();
        writeln!(f, "#!/bin/sh -e").unwrap();
        writeln!(f, "echo hi").unwrap();
        drop(f);

        assert_eq!(read_shebang(&script).unwrap(), Some(PathBuf::from("/bin/sh")));
    }

    #[test]
    fn test_no_shebang() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("plain");
        fs::write(&script, "no shebang here").unwrap();
        assert_eq!(read_shebang(&script).unwrap(), None);
    }

    #[test]
    fn test_exec_plan_prefers_interpreter() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("s.py");
        fs::write(&script, "print('x')").unwrap();

        let plan = CgiPlan {
            script: script.clone(),
            interpreter: Some(PathBuf::from("/usr/bin/python3")),
            location_path: "/cgi/".to_string(),
            document_root: dir.path().to_string_lossy().into_owned(),
            timeout: Duration::from_secs(30),
        };

        let (program, args) = exec_plan(&plan).unwrap();
        assert_eq!(program, PathBuf::from("/usr/bin/python3"));
        assert_eq!(args, vec![script]);
    }

    #[test]
    fn test_exec_plan_rejects_non_executable() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("data.bin");
        fs::write(&script, [0u8, 1, 2]).unwrap();

        let plan = CgiPlan {
            script,
            interpreter: None,
            location_path: "/cgi/".to_string(),
            document_root: dir.path().to_string_lossy().into_owned(),
            timeout: Duration::from_secs(30),
        };

        assert!(exec_plan(&plan).is_err());
    }
}
