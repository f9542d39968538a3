// kiln-common/src/dependency/definition.rs
use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct DependencyTag: u8 {
        const RUNTIME     = 0b00000001;
        const BUILD       = 0b00000010;
        const TEST        = 0b00000100;
    }
}

impl Default for DependencyTag {
    fn default() -> Self {
        Self::RUNTIME
    }
}

impl fmt::Display for DependencyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .iter_names()
            .map(|(name, _)| match name {
                "RUNTIME" => "runtime",
                "BUILD" => "build",
                "TEST" => "test",
                other => other,
            })
            .collect();
        write!(f, "{}", names.join("+"))
    }
}

impl DependencyTag {
    fn from_tag_name(tag: &str) -> Option<Self> {
        match tag {
            "runtime" => Some(Self::RUNTIME),
            "build" => Some(Self::BUILD),
            "test" => Some(Self::TEST),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Dependency {
    pub name: String,
    pub tags: DependencyTag,
}

impl Dependency {
    pub fn new_runtime(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: DependencyTag::RUNTIME,
        }
    }

    pub fn new_with_tags(name: impl Into<String>, tags: DependencyTag) -> Self {
        Self {
            name: name.into(),
            tags,
        }
    }

    /// Expands the record into one `(name, phase)` pair per tag it carries.
    pub fn phase_pairs(&self) -> impl Iterator<Item = (&str, DependencyTag)> + '_ {
        self.tags.iter().map(move |tag| (self.name.as_str(), tag))
    }
}

// A dependency is written either as a bare name (runtime) or as
// `{ name = "cmake", tags = ["build"] }`.
impl<'de> Deserialize<'de> for Dependency {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawDependency {
            Name(String),
            Tagged {
                name: String,
                #[serde(default)]
                tags: Vec<String>,
            },
        }

        match RawDependency::deserialize(deserializer)? {
            RawDependency::Name(name) => Ok(Dependency::new_runtime(name)),
            RawDependency::Tagged { name, tags } => {
                let mut dep_tags = DependencyTag::empty();
                for tag in &tags {
                    dep_tags |= DependencyTag::from_tag_name(tag).ok_or_else(|| {
                        serde::de::Error::custom(format!(
                            "unknown dependency tag '{tag}' on '{name}' (expected build, runtime or test)"
                        ))
                    })?;
                }
                if dep_tags.is_empty() {
                    dep_tags = DependencyTag::RUNTIME;
                }
                Ok(Dependency::new_with_tags(name, dep_tags))
            }
        }
    }
}

pub trait DependencyExt {
    fn filter_by_tags(&self, include: DependencyTag, exclude: DependencyTag) -> Vec<&Dependency>;
    fn runtime(&self) -> Vec<&Dependency>;
    fn build_time(&self) -> Vec<&Dependency>;
}

impl DependencyExt for Vec<Dependency> {
    fn filter_by_tags(&self, include: DependencyTag, exclude: DependencyTag) -> Vec<&Dependency> {
        self.iter()
            .filter(|dep| dep.tags.contains(include) && !dep.tags.intersects(exclude))
            .collect()
    }

    fn runtime(&self) -> Vec<&Dependency> {
        self.filter_by_tags(DependencyTag::RUNTIME, DependencyTag::empty())
    }

    fn build_time(&self) -> Vec<&Dependency> {
        self.filter_by_tags(DependencyTag::BUILD, DependencyTag::empty())
    }
}
