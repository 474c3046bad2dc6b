use std::io::Write as _;
use std::sync::mpsc;
use std::time::Duration;

// A dedicated thread owns stderr: the current pipeline stage is painted
// as a single rewritable line and log output is woven in above it.

const REPAINT_PERIOD: Duration = Duration::from_millis(100);

pub(crate) fn init(start: std::time::Instant, enable_progress: bool) -> Handle {
    let (sender, receiver) = mpsc::channel();

    let join_handle = std::thread::Builder::new()
        .name("term out".into())
        .spawn(move || thread_main(start, enable_progress, receiver))
        .expect("failed to spawn thread");

    Handle {
        join_handle,
        sender,
    }
}

enum Command {
    SetProgress(String),
    PrintRawLine(Vec<u8>),
    Finish,
}

fn thread_main(
    start: std::time::Instant,
    enable_progress: bool,
    receiver: mpsc::Receiver<Command>,
) {
    let mut stderr = std::io::stderr();
    let mut progress: Option<String> = None;
    let mut dirty = false;

    loop {
        let cmd = if progress.is_some() {
            match receiver.recv_timeout(REPAINT_PERIOD) {
                Ok(cmd) => Some(cmd),
                Err(mpsc::RecvTimeoutError::Timeout) => None,
                Err(mpsc::RecvTimeoutError::Disconnected) => Some(Command::Finish),
            }
        } else {
            match receiver.recv() {
                Ok(cmd) => Some(cmd),
                Err(_) => Some(Command::Finish),
            }
        };

        match cmd {
            Some(Command::SetProgress(new_progress)) => {
                if enable_progress {
                    progress = Some(new_progress);
                    dirty = true;
                }
            }
            Some(Command::PrintRawLine(line)) => {
                if progress.is_some() {
                    must(crossterm::queue!(
                        stderr,
                        crossterm::terminal::Clear(crossterm::terminal::ClearType::CurrentLine),
                        crossterm::cursor::MoveToColumn(0),
                    ));
                }
                must(stderr.write_all(&line));
                if let Some(ref progress) = progress {
                    paint(&mut stderr, start, progress);
                }
                must(stderr.flush());
            }
            Some(Command::Finish) => {
                if let Some(ref progress) = progress {
                    paint(&mut stderr, start, progress);
                    must(crossterm::queue!(
                        stderr,
                        crossterm::style::Print('\n'),
                        crossterm::cursor::MoveToColumn(0),
                    ));
                    must(stderr.flush());
                }
                break;
            }
            None => {
                // repaint tick
                if dirty {
                    if let Some(ref progress) = progress {
                        paint(&mut stderr, start, progress);
                        must(stderr.flush());
                    }
                    dirty = false;
                }
            }
        }
    }
}

fn paint(stderr: &mut std::io::Stderr, start: std::time::Instant, progress: &str) {
    let elapsed = start.elapsed().as_secs();
    let line = format!(
        "[{:02}:{:02}:{:02}] {progress}",
        elapsed / 3600,
        (elapsed / 60) % 60,
        elapsed % 60,
    );
    must(crossterm::queue!(
        stderr,
        crossterm::cursor::MoveToColumn(0),
        crossterm::style::Print(line),
        crossterm::terminal::Clear(crossterm::terminal::ClearType::UntilNewLine),
    ));
}

fn must<T>(r: std::io::Result<T>) -> T {
    r.expect("stderr write failed")
}

pub(crate) struct Handle {
    join_handle: std::thread::JoinHandle<()>,
    sender: mpsc::Sender<Command>,
}

impl Handle {
    pub(crate) fn finish(self) {
        self.sender
            .send(Command::Finish)
            .expect("term out endpoint closed");
        self.join_handle.join().expect("term out thread panicked");
    }

    pub(crate) fn get_progress_print(&self) -> ProgressPrint {
        ProgressPrint {
            sender: self.sender.clone(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct ProgressPrint {
    sender: mpsc::Sender<Command>,
}

impl ProgressPrint {
    pub(crate) fn set_progress(&self, progress: String) {
        self.sender
            .send(Command::SetProgress(progress))
            .expect("term out endpoint closed");
    }

    pub(crate) fn print_raw_line(&self, line: Vec<u8>) {
        self.sender
            .send(Command::PrintRawLine(line))
            .expect("term out endpoint closed");
    }

    /// A detached printer for tests and headless runs.
    #[cfg(test)]
    pub(crate) fn sink() -> ProgressPrint {
        let (sender, receiver) = mpsc::channel();
        std::mem::forget(receiver);
        ProgressPrint { sender }
    }
}
