//! Declarative table of known-benign reference patterns.
//!
//! Rules classify candidate edges during the path search; they never
//! remove edges from the graph. A matched edge is deprioritized (the
//! search falls back to it only when no clean path exists) unless the
//! rule is marked `always`, in which case the edge is suppressed
//! outright.

use regex::Regex;

use crate::error::{AnalyzerError, Result};

/// Outcome of matching one rule: the reason string reported alongside
/// the reference chain, plus the suppression flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exclusion {
    pub reason: String,
    pub always: bool,
}

#[derive(Debug)]
enum NameMatcher {
    Exact(String),
    Pattern(Regex),
}

impl NameMatcher {
    fn parse(pattern: &str) -> Result<Self> {
        if pattern.chars().all(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '$')) {
            Ok(NameMatcher::Exact(pattern.to_string()))
        } else {
            let anchored = format!("^(?:{})$", pattern);
            let regex = Regex::new(&anchored).map_err(|e| {
                AnalyzerError::InvalidFormat(format!("bad exclusion pattern '{}': {}", pattern, e))
            })?;
            Ok(NameMatcher::Pattern(regex))
        }
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            NameMatcher::Exact(exact) => exact == name,
            NameMatcher::Pattern(regex) => regex.is_match(name),
        }
    }
}

#[derive(Debug)]
struct FieldRule {
    class_name: String,
    field_name: String,
    exclusion: Exclusion,
}

#[derive(Debug)]
struct ThreadRule {
    name: NameMatcher,
    exclusion: Exclusion,
}

#[derive(Debug)]
struct ClassRule {
    name: NameMatcher,
    gc_root_only: bool,
    exclusion: Exclusion,
}

/// The evaluated rule set. Construct through [`ExcludedRefsBuilder`].
#[derive(Debug, Default)]
pub struct ExcludedRefs {
    instance_fields: Vec<FieldRule>,
    static_fields: Vec<FieldRule>,
    threads: Vec<ThreadRule>,
    classes: Vec<ClassRule>,
}

impl ExcludedRefs {
    pub fn builder() -> ExcludedRefsBuilder {
        ExcludedRefsBuilder::default()
    }

    /// Match an instance-field reference. The holder's whole class
    /// chain is consulted: a rule on a super class applies to fields
    /// reached through any subclass.
    pub fn instance_field<'a, I>(&self, holder_chain: I, field: &str) -> Option<&Exclusion>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for class_name in holder_chain {
            for rule in &self.instance_fields {
                if rule.class_name == class_name && rule.field_name == field {
                    return Some(&rule.exclusion);
                }
            }
        }
        None
    }

    /// Match a static-field reference out of the named class.
    pub fn static_field(&self, class_name: &str, field: &str) -> Option<&Exclusion> {
        self.static_fields
            .iter()
            .find(|rule| rule.class_name == class_name && rule.field_name == field)
            .map(|rule| &rule.exclusion)
    }

    /// Match a stack-local reference held by the named thread.
    pub fn thread(&self, thread_name: &str) -> Option<&Exclusion> {
        self.threads
            .iter()
            .find(|rule| rule.name.matches(thread_name))
            .map(|rule| &rule.exclusion)
    }

    /// Match a reference into an object whose class chain is given.
    /// When `gc_root` is false only rules that apply everywhere are
    /// consulted; seed classification passes true, which additionally
    /// enables `gc_root_only` rules.
    pub fn class<'a, I>(&self, referent_chain: I, gc_root: bool) -> Option<&Exclusion>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for class_name in referent_chain {
            for rule in &self.classes {
                if (!rule.gc_root_only || gc_root) && rule.name.matches(class_name) {
                    return Some(&rule.exclusion);
                }
            }
        }
        None
    }
}

/// Builder mirroring the rule shapes: instance field, static field,
/// thread name, class name. `always()` upgrades the most recently
/// added rule to a suppressing one.
#[derive(Debug, Default)]
pub struct ExcludedRefsBuilder {
    refs: ExcludedRefs,
    last: Option<LastRule>,
}

#[derive(Debug, Clone, Copy)]
enum LastRule {
    InstanceField,
    StaticField,
    Thread,
    Class,
}

impl ExcludedRefsBuilder {
    pub fn instance_field(
        mut self,
        class_name: impl Into<String>,
        field_name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        self.refs.instance_fields.push(FieldRule {
            class_name: class_name.into(),
            field_name: field_name.into(),
            exclusion: Exclusion {
                reason: reason.into(),
                always: false,
            },
        });
        self.last = Some(LastRule::InstanceField);
        self
    }

    pub fn static_field(
        mut self,
        class_name: impl Into<String>,
        field_name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        self.refs.static_fields.push(FieldRule {
            class_name: class_name.into(),
            field_name: field_name.into(),
            exclusion: Exclusion {
                reason: reason.into(),
                always: false,
            },
        });
        self.last = Some(LastRule::StaticField);
        self
    }

    pub fn thread(mut self, name_pattern: &str, reason: impl Into<String>) -> Result<Self> {
        self.refs.threads.push(ThreadRule {
            name: NameMatcher::parse(name_pattern)?,
            exclusion: Exclusion {
                reason: reason.into(),
                always: false,
            },
        });
        self.last = Some(LastRule::Thread);
        Ok(self)
    }

    pub fn class(
        mut self,
        name_pattern: &str,
        gc_root_only: bool,
        reason: impl Into<String>,
    ) -> Result<Self> {
        self.refs.classes.push(ClassRule {
            name: NameMatcher::parse(name_pattern)?,
            gc_root_only,
            exclusion: Exclusion {
                reason: reason.into(),
                always: false,
            },
        });
        self.last = Some(LastRule::Class);
        Ok(self)
    }

    /// Mark the most recently added rule as suppressing: matched
    /// references are dropped from the search instead of deprioritized.
    pub fn always(mut self) -> Self {
        match self.last {
            Some(LastRule::InstanceField) => {
                if let Some(rule) = self.refs.instance_fields.last_mut() {
                    rule.exclusion.always = true;
                }
            }
            Some(LastRule::StaticField) => {
                if let Some(rule) = self.refs.static_fields.last_mut() {
                    rule.exclusion.always = true;
                }
            }
            Some(LastRule::Thread) => {
                if let Some(rule) = self.refs.threads.last_mut() {
                    rule.exclusion.always = true;
                }
            }
            Some(LastRule::Class) => {
                if let Some(rule) = self.refs.classes.last_mut() {
                    rule.exclusion.always = true;
                }
            }
            None => {}
        }
        self
    }

    pub fn build(self) -> ExcludedRefs {
        self.refs
    }
}
