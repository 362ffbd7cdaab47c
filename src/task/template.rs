// src/task/template.rs

//! Command templates.
//!
//! A template is a shell command with `{placeholder}` markers:
//!
//! | placeholder      | renders as                                          |
//! |------------------|-----------------------------------------------------|
//! | `{sample}`       | fan-out key (empty for single-instance stages)      |
//! | `{stage}`        | stage name                                          |
//! | `{task}`         | task id                                             |
//! | `{cpu}`          | estimated CPUs                                      |
//! | `{memory_mb}`    | estimated memory in MiB                             |
//! | `{time_minutes}` | estimated time, whole minutes rounded up            |
//! | `{outdir}`       | the task's output directory                         |
//! | `{in:NAME}`      | input value/path(s); empty if an optional input is absent |
//! | `{arg:NAME}`     | `<flag> <value>` for input NAME, or nothing if absent |
//! | `{out:NAME}`     | output path                                         |
//! | `{param:KEY}`    | parameter from `[params]` / stage `params`          |
//!
//! `{{` and `}}` produce literal braces. Substituted paths and values are
//! shell-quoted when they contain anything outside a conservative safe set.

use std::borrow::Cow;
use std::fmt;

use regex::Regex;

use crate::estimate::ResourceEstimate;
use crate::task::descriptor::{ResolvedInput, ResolvedInputs, TaskDescriptor};

const PLACEHOLDER_PATTERN: &str = r"\{\{|\}\}|\{([a-z_]+)(?::([^{}]+))?\}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    Sample,
    Stage,
    Task,
    Cpu,
    MemoryMb,
    TimeMinutes,
    OutDir,
    Input(String),
    Arg(String),
    Output(String),
    Param(String),
}

impl Placeholder {
    /// Whether rendering needs a resource estimate.
    pub fn needs_estimate(&self) -> bool {
        matches!(
            self,
            Placeholder::Cpu | Placeholder::MemoryMb | Placeholder::TimeMinutes
        )
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placeholder::Sample => write!(f, "{{sample}}"),
            Placeholder::Stage => write!(f, "{{stage}}"),
            Placeholder::Task => write!(f, "{{task}}"),
            Placeholder::Cpu => write!(f, "{{cpu}}"),
            Placeholder::MemoryMb => write!(f, "{{memory_mb}}"),
            Placeholder::TimeMinutes => write!(f, "{{time_minutes}}"),
            Placeholder::OutDir => write!(f, "{{outdir}}"),
            Placeholder::Input(n) => write!(f, "{{in:{n}}}"),
            Placeholder::Arg(n) => write!(f, "{{arg:{n}}}"),
            Placeholder::Output(n) => write!(f, "{{out:{n}}}"),
            Placeholder::Param(n) => write!(f, "{{param:{n}}}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Placeholder(Placeholder),
}

/// Parsed command template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl CommandTemplate {
    pub fn parse(source: &str) -> Result<Self, String> {
        let re = Regex::new(PLACEHOLDER_PATTERN).map_err(|e| e.to_string())?;
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in re.captures_iter(source) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            if whole.start() > last {
                segments.push(Segment::Text(source[last..whole.start()].to_string()));
            }
            last = whole.end();

            match whole.as_str() {
                "{{" => segments.push(Segment::Text("{".to_string())),
                "}}" => segments.push(Segment::Text("}".to_string())),
                _ => {
                    let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                    let arg = caps.get(2).map(|m| m.as_str().trim().to_string());
                    segments.push(Segment::Placeholder(placeholder_from(name, arg)?));
                }
            }
        }

        if last < source.len() {
            segments.push(Segment::Text(source[last..].to_string()));
        }

        // Stray braces are almost always a typo'd placeholder.
        for segment in &segments {
            if let Segment::Text(text) = segment {
                if text != "{" && text != "}" && (text.contains('{') || text.contains('}')) {
                    return Err(format!("unbalanced brace in command template near {text:?}"));
                }
            }
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &Placeholder> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(p) => Some(p),
            Segment::Text(_) => None,
        })
    }

    /// Render against a task, its resolved inputs and (if available) its
    /// resource estimate.
    pub fn render(&self, ctx: &RenderContext<'_>) -> Result<String, String> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Placeholder(p) => out.push_str(&ctx.render_placeholder(p)?),
            }
        }
        Ok(out)
    }
}

fn placeholder_from(name: &str, arg: Option<String>) -> Result<Placeholder, String> {
    let needs_arg = matches!(name, "in" | "arg" | "out" | "param");
    match (needs_arg, arg) {
        (true, None) => Err(format!("placeholder {{{name}:...}} needs a name")),
        (true, Some(arg)) if arg.is_empty() => {
            Err(format!("placeholder {{{name}:...}} needs a name"))
        }
        (true, Some(arg)) => Ok(match name {
            "in" => Placeholder::Input(arg),
            "arg" => Placeholder::Arg(arg),
            "out" => Placeholder::Output(arg),
            _ => Placeholder::Param(arg),
        }),
        (false, Some(arg)) => Err(format!("placeholder {{{name}}} takes no argument (got {arg:?})")),
        (false, None) => match name {
            "sample" => Ok(Placeholder::Sample),
            "stage" => Ok(Placeholder::Stage),
            "task" => Ok(Placeholder::Task),
            "cpu" => Ok(Placeholder::Cpu),
            "memory_mb" => Ok(Placeholder::MemoryMb),
            "time_minutes" => Ok(Placeholder::TimeMinutes),
            "outdir" => Ok(Placeholder::OutDir),
            other => Err(format!("unknown placeholder {{{other}}}")),
        },
    }
}

/// Everything a template may refer to while rendering.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub task: &'a TaskDescriptor,
    pub inputs: &'a ResolvedInputs,
    pub estimate: Option<&'a ResourceEstimate>,
}

impl RenderContext<'_> {
    fn render_placeholder(&self, p: &Placeholder) -> Result<String, String> {
        let estimate = || {
            self.estimate
                .ok_or_else(|| format!("{p} used but no resource estimate is available"))
        };

        Ok(match p {
            Placeholder::Sample => self
                .task
                .key
                .as_deref()
                .map(|k| shell_quote(k).into_owned())
                .unwrap_or_default(),
            Placeholder::Stage => shell_quote(&self.task.stage).into_owned(),
            Placeholder::Task => shell_quote(&self.task.id).into_owned(),
            Placeholder::Cpu => estimate()?.cpu.to_string(),
            Placeholder::MemoryMb => estimate()?.memory_mb.to_string(),
            Placeholder::TimeMinutes => estimate()?.time_minutes().to_string(),
            Placeholder::OutDir => shell_quote(&self.task.output_dir.display().to_string()).into_owned(),
            Placeholder::Input(name) => self.render_input(name)?,
            Placeholder::Arg(name) => {
                let value = self.render_input(name)?;
                let flag = self.task.input(name).and_then(|i| i.flag.as_deref());
                match (value.is_empty(), flag) {
                    (true, _) => String::new(),
                    (false, Some(flag)) => format!("{flag} {value}"),
                    (false, None) => value,
                }
            }
            Placeholder::Output(name) => {
                let output = self
                    .task
                    .output(name)
                    .ok_or_else(|| format!("unknown output '{name}'"))?;
                shell_quote(&output.path.display().to_string()).into_owned()
            }
            Placeholder::Param(key) => {
                let value = self
                    .task
                    .params
                    .get(key)
                    .ok_or_else(|| format!("unknown param '{key}'"))?;
                shell_quote(value).into_owned()
            }
        })
    }

    fn render_input(&self, name: &str) -> Result<String, String> {
        let resolved = self
            .inputs
            .get(name)
            .ok_or_else(|| format!("input '{name}' was not resolved"))?;
        Ok(match resolved {
            ResolvedInput::Absent => String::new(),
            ResolvedInput::Value(v) => shell_quote(v).into_owned(),
            ResolvedInput::Paths(paths) => paths
                .iter()
                .map(|p| shell_quote(&p.display().to_string()).into_owned())
                .collect::<Vec<_>>()
                .join(" "),
        })
    }
}

/// Quote `s` for `sh` unless it only contains safe characters.
pub fn shell_quote(s: &str) -> Cow<'_, str> {
    let safe = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c));
    if safe {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(format!("'{}'", s.replace('\'', r"'\''")))
    }
}
