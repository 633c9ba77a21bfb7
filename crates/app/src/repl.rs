use std::io::{self, Write};
use std::path::Path;

use learn_core::model::{Chapter, ChapterId, ChapterStatus};
use sandbox::ExecutionResult;
use services::{SessionCoordinator, SessionError};

/// Whether the input loop should keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Line-oriented front end over one [`SessionCoordinator`].
pub struct Repl {
    coordinator: SessionCoordinator,
    draft: Option<String>,
}

const HELP: &str = "\
Commands:
  chapters            list chapters and their status
  show                show the current chapter
  open <id>           open an unlocked chapter
  next | prev         move through the course
  run                 type code, finish with a line containing only '.'
  example             run the current chapter's example
  quiz <n> <n> ...    answer the quiz, one option number per question
  progress            show totals for this session
  export <file>       write progress to a JSON file
  import <file>       load progress from a JSON file
  save                store progress in the database
  reset               start the course over
  help                show this list
  quit                save and leave";

impl Repl {
    #[must_use]
    pub fn new(coordinator: SessionCoordinator) -> Self {
        Self {
            coordinator,
            draft: None,
        }
    }

    #[must_use]
    pub fn coordinator(&self) -> &SessionCoordinator {
        &self.coordinator
    }

    pub fn coordinator_mut(&mut self) -> &mut SessionCoordinator {
        &mut self.coordinator
    }

    #[must_use]
    pub fn prompt(&self) -> &'static str {
        if self.draft.is_some() { "... " } else { "learn> " }
    }

    /// Writes the greeting and the current chapter.
    ///
    /// # Errors
    ///
    /// Returns any error from `out`.
    pub fn greet(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "Session {}", self.coordinator.session_id())?;
        writeln!(out, "Type 'help' for commands.")?;
        writeln!(out)?;
        self.show_current(out)
    }

    /// Handles one line of input.
    ///
    /// Session errors are reported to `out`; only write failures are returned.
    ///
    /// # Errors
    ///
    /// Returns any error from `out`.
    pub async fn handle_line(&mut self, line: &str, out: &mut impl Write) -> io::Result<Flow> {
        if let Some(draft) = self.draft.as_mut() {
            if line.trim_end() == "." {
                let source = std::mem::take(draft);
                self.draft = None;
                return self.run(&source, out).await;
            }
            draft.push_str(line.trim_end_matches(['\r', '\n']));
            draft.push('\n');
            return Ok(Flow::Continue);
        }

        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Ok(Flow::Continue);
        };
        let rest: Vec<&str> = words.collect();

        match command {
            "help" | "?" => writeln!(out, "{HELP}")?,
            "chapters" | "ls" => self.list_chapters(out)?,
            "show" => self.show_current(out)?,
            "open" => match rest.as_slice() {
                [raw] => match ChapterId::new(*raw) {
                    Ok(id) => match self.coordinator.open_chapter(&id) {
                        Ok(chapter) => write_chapter(chapter, out)?,
                        Err(err) => report(&err, out)?,
                    },
                    Err(err) => writeln!(out, "error: {err}")?,
                },
                _ => writeln!(out, "usage: open <chapter-id>")?,
            },
            "next" => match self.coordinator.next_chapter() {
                Ok(chapter) => write_chapter(chapter, out)?,
                Err(err) => report(&err, out)?,
            },
            "prev" | "previous" => match self.coordinator.previous_chapter() {
                Ok(chapter) => write_chapter(chapter, out)?,
                Err(err) => report(&err, out)?,
            },
            "run" => {
                self.draft = Some(String::new());
                writeln!(out, "Enter code. Finish with a line containing only '.'")?;
            }
            "example" => {
                let source = self
                    .coordinator
                    .current_chapter()
                    .map(|c| c.example_code().to_owned())
                    .unwrap_or_default();
                return self.run(&source, out).await;
            }
            "quiz" => self.quiz(&rest, out)?,
            "progress" => self.progress(out)?,
            "export" => match rest.as_slice() {
                [path] => self.export(Path::new(path), out).await?,
                _ => writeln!(out, "usage: export <file>")?,
            },
            "import" => match rest.as_slice() {
                [path] => self.import(Path::new(path), out).await?,
                _ => writeln!(out, "usage: import <file>")?,
            },
            "save" => match self.coordinator.save().await {
                Ok(()) => writeln!(out, "Progress saved.")?,
                Err(err) => report(&err, out)?,
            },
            "reset" => {
                self.coordinator.reset();
                writeln!(out, "Progress cleared. Back to the first chapter.")?;
            }
            "quit" | "exit" => return Ok(Flow::Quit),
            other => writeln!(out, "unknown command '{other}', try 'help'")?,
        }
        Ok(Flow::Continue)
    }

    async fn run(&mut self, source: &str, out: &mut impl Write) -> io::Result<Flow> {
        match self.coordinator.run_current(source).await {
            Ok(result) => write_result(&result, out)?,
            Err(err) => report(&err, out)?,
        }
        Ok(Flow::Continue)
    }

    fn quiz(&mut self, raw: &[&str], out: &mut impl Write) -> io::Result<()> {
        let mut answers = Vec::with_capacity(raw.len());
        for word in raw {
            match word.parse::<usize>() {
                Ok(n) if n >= 1 => answers.push(n - 1),
                _ => {
                    return writeln!(out, "answers are option numbers starting at 1, got '{word}'");
                }
            }
        }

        let outcome = match self.coordinator.submit_current_quiz(&answers) {
            Ok(outcome) => outcome,
            Err(err) => return report(&err, out),
        };

        for (number, item) in outcome.feedback.iter().enumerate() {
            let mark = if item.is_correct { "correct" } else { "wrong" };
            write!(out, "  {}. {mark}", number + 1)?;
            if !item.is_correct {
                write!(out, " (answer: {})", item.correct_index + 1)?;
            }
            writeln!(out)?;
            if !item.explanation.is_empty() {
                writeln!(out, "     {}", item.explanation)?;
            }
        }
        writeln!(
            out,
            "Score: {}/{} ({}%)",
            outcome.score.correct,
            outcome.score.total,
            outcome.score.percent()
        )?;
        if outcome.passed {
            writeln!(out, "Passed!")?;
        } else {
            writeln!(out, "Not passed yet. Review the chapter and try again.")?;
        }
        for id in &outcome.newly_unlocked {
            writeln!(out, "Unlocked chapter {id}.")?;
        }
        Ok(())
    }

    fn list_chapters(&self, out: &mut impl Write) -> io::Result<()> {
        let view = self.coordinator.progress_snapshot();
        for item in &view.chapters {
            let marker = if item.is_current { '>' } else { ' ' };
            let status = match item.status {
                ChapterStatus::Locked => "locked",
                ChapterStatus::Unlocked => "open",
                ChapterStatus::Completed => "done",
            };
            writeln!(
                out,
                "{marker} {}. {:<32} {:<7} {}",
                item.ordinal, item.title, status, item.id
            )?;
        }
        Ok(())
    }

    fn progress(&self, out: &mut impl Write) -> io::Result<()> {
        let view = self.coordinator.progress_snapshot();
        writeln!(
            out,
            "Completed {}/{} chapters ({}%)",
            view.completed_chapters,
            view.total_chapters,
            view.percent_complete()
        )?;
        writeln!(out, "Code runs: {}", view.total_code_runs)?;
        writeln!(out, "Quiz attempts: {}", view.total_quiz_attempts)?;
        if let Some(avg) = view.average_best_score() {
            writeln!(out, "Average best score: {avg}%")?;
        }
        for item in &view.chapters {
            if item.status == ChapterStatus::Locked {
                continue;
            }
            let best = item
                .best_quiz_score
                .map_or_else(|| "-".to_string(), |s| format!("{}/{}", s.correct, s.total));
            writeln!(
                out,
                "  {:<24} runs {:>3}  attempts {:>2}  best {:>5}  time {}m",
                item.id.as_str(),
                item.code_executions,
                item.quiz_attempts,
                best,
                item.time_spent_secs / 60
            )?;
        }
        Ok(())
    }

    fn show_current(&self, out: &mut impl Write) -> io::Result<()> {
        match self.coordinator.current_chapter() {
            Some(chapter) => write_chapter(chapter, out),
            None => writeln!(out, "no chapter is open"),
        }
    }

    async fn export(&self, path: &Path, out: &mut impl Write) -> io::Result<()> {
        let json = match self.coordinator.export() {
            Ok(json) => json,
            Err(err) => return report(&err, out),
        };
        match tokio::fs::write(path, json).await {
            Ok(()) => writeln!(out, "Progress written to {}.", path.display()),
            Err(err) => writeln!(out, "error: could not write {}: {err}", path.display()),
        }
    }

    async fn import(&mut self, path: &Path, out: &mut impl Write) -> io::Result<()> {
        let json = match tokio::fs::read_to_string(path).await {
            Ok(json) => json,
            Err(err) => {
                return writeln!(out, "error: could not read {}: {err}", path.display());
            }
        };
        match self.coordinator.import(&json) {
            Ok(()) => {
                writeln!(out, "Progress loaded.")?;
                self.show_current(out)
            }
            Err(err) => report(&err, out),
        }
    }
}

fn report(err: &SessionError, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "error: {}", err.user_message())
}

fn write_chapter(chapter: &Chapter, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "== {}. {} ({}) ==", chapter.ordinal(), chapter.title(), chapter.id())?;
    writeln!(out, "{}", chapter.theory().trim_end())?;
    writeln!(out)?;
    writeln!(out, "-- example --")?;
    writeln!(out, "{}", chapter.example_code().trim_end())?;
    if !chapter.starter_code().is_empty() {
        writeln!(out, "-- try it --")?;
        writeln!(out, "{}", chapter.starter_code().trim_end())?;
    }
    writeln!(out, "-- quiz --")?;
    for (number, question) in chapter.quiz().questions().iter().enumerate() {
        writeln!(out, "{}. {}", number + 1, question.prompt())?;
        for (option, text) in question.options().iter().enumerate() {
            writeln!(out, "   {}) {text}", option + 1)?;
        }
    }
    Ok(())
}

fn write_result(result: &ExecutionResult, out: &mut impl Write) -> io::Result<()> {
    if !result.output.is_empty() {
        writeln!(out, "{}", result.output)?;
    }
    if let Some(error) = &result.error {
        writeln!(out, "[{}] {}", error.kind.as_str(), error.message)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use learn_core::time::fixed_clock;
    use services::{AppServices, SessionConfig};
    use storage::catalog::bundled_catalog;

    fn repl() -> Repl {
        let services = AppServices::in_memory(
            bundled_catalog().unwrap(),
            SessionConfig::default(),
            fixed_clock(),
        );
        Repl::new(services.start_session())
    }

    async fn feed(repl: &mut Repl, lines: &[&str]) -> String {
        let mut out = Vec::new();
        for line in lines {
            repl.handle_line(line, &mut out).await.unwrap();
        }
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn multi_line_run() {
        let mut repl = repl();
        let out = feed(&mut repl, &["run", "x = 20", "print(x + 1)", "."]).await;
        assert!(out.ends_with("21\n"), "{out}");
        assert_eq!(repl.prompt(), "learn> ");
        assert_eq!(repl.coordinator().progress_snapshot().total_code_runs, 1);
    }

    #[tokio::test]
    async fn prompt_changes_while_drafting() {
        let mut repl = repl();
        feed(&mut repl, &["run", "print(1)"]).await;
        assert_eq!(repl.prompt(), "... ");
    }

    #[tokio::test]
    async fn quiz_answers_are_one_based() {
        let mut repl = repl();
        let answers: Vec<String> = repl
            .coordinator()
            .current_chapter()
            .unwrap()
            .quiz()
            .questions()
            .iter()
            .map(|q| (q.correct_index() + 1).to_string())
            .collect();
        let line = format!("quiz {}", answers.join(" "));
        let out = feed(&mut repl, &[&line]).await;
        assert!(out.contains("Score: 3/3 (100%)"), "{out}");
        assert!(out.contains("Unlocked chapter variables_datatypes."), "{out}");

        let out = feed(&mut repl, &["quiz 0 1 1"]).await;
        assert!(out.contains("starting at 1"), "{out}");
    }

    #[tokio::test]
    async fn errors_are_reported_not_returned() {
        let mut repl = repl();
        let out = feed(&mut repl, &["open control_flow", "next", "bogus"]).await;
        assert!(out.contains("locked"), "{out}");
        assert!(out.contains("Pass the quiz"), "{out}");
        assert!(out.contains("unknown command 'bogus'"), "{out}");
    }

    #[tokio::test]
    async fn quit_stops_the_loop() {
        let mut repl = repl();
        let mut out = Vec::new();
        assert_eq!(repl.handle_line("quit", &mut out).await.unwrap(), Flow::Quit);
    }
}
