// src/repository/parsers/rpmmd.rs

//! rpm-md repository metadata parser
//!
//! Parses `repodata/repomd.xml` to locate the primary package list, and the
//! primary XML itself into [`Package`] records with their provides,
//! requires, conflicts and obsoletes.

use super::{DataLocation, RepositoryParser};
use crate::error::{Error, Result};
use crate::packages::{Capability, Dependency, Operator, Package};
use crate::version::RpmVersion;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::{debug, warn};

/// Attribute value by key, lossily decoded
fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .filter_map(|a| a.ok())
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(&a.value).to_string())
}

/// rpm-md (`repomd.xml` + `primary.xml`) parser
#[derive(Debug, Default)]
pub struct RpmMdParser;

impl RpmMdParser {
    pub fn new() -> Self {
        Self
    }
}

impl RepositoryParser for RpmMdParser {
    fn index_path(&self) -> &'static str {
        "repodata/repomd.xml"
    }

    fn parse_index(&self, index: &[u8]) -> Result<DataLocation> {
        let mut reader = Reader::from_reader(index);
        reader.trim_text(true);

        let mut buf = Vec::new();
        let mut in_primary = false;
        let mut in_checksum = false;
        let mut checksum_type = None;
        let mut checksum = None;
        let mut href = None;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => match e.local_name().as_ref() {
                    b"data" => in_primary = attribute(&e, b"type").as_deref() == Some("primary"),
                    b"checksum" if in_primary => {
                        in_checksum = true;
                        checksum_type = attribute(&e, b"type");
                    }
                    b"location" if in_primary => href = attribute(&e, b"href"),
                    _ => {}
                },
                Ok(Event::Empty(e)) if in_primary && e.local_name().as_ref() == b"location" => {
                    href = attribute(&e, b"href");
                }
                Ok(Event::Text(e)) if in_checksum => {
                    checksum = Some(e.unescape().unwrap_or_default().trim().to_string());
                }
                Ok(Event::End(e)) => match e.local_name().as_ref() {
                    b"data" => in_primary = false,
                    b"checksum" => in_checksum = false,
                    _ => {}
                },
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(Error::ParseError(format!(
                        "Failed to parse repomd.xml: {}",
                        e
                    )));
                }
                _ => {}
            }
            buf.clear();
        }

        let href = href.ok_or_else(|| {
            Error::ParseError("Could not find primary data location in repomd.xml".to_string())
        })?;
        let checksum = match (checksum_type, checksum) {
            (Some(kind), Some(value)) if !value.is_empty() => Some((kind, value)),
            _ => None,
        };
        Ok(DataLocation { href, checksum })
    }

    fn parse_packages(&self, data: &[u8], base_url: &str) -> Result<Vec<Package>> {
        let mut reader = Reader::from_reader(data);
        reader.trim_text(true);

        let mut packages = Vec::new();
        let mut buf = Vec::new();
        let mut current: Option<PackageBuilder> = None;
        let mut current_tag = Vec::new();
        let mut section = Section::None;
        let mut skipped = 0usize;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let tag = e.local_name().as_ref().to_vec();
                    match tag.as_slice() {
                        b"package" => current = Some(PackageBuilder::default()),
                        b"checksum" => {
                            if let Some(pkg) = current.as_mut() {
                                pkg.checksum_type = attribute(&e, b"type");
                            }
                        }
                        other => {
                            if let Some(next) = Section::from_tag(other) {
                                section = next;
                            }
                        }
                    }
                    current_tag = tag;
                }
                Ok(Event::Empty(e)) => {
                    let Some(pkg) = current.as_mut() else {
                        buf.clear();
                        continue;
                    };
                    match e.local_name().as_ref() {
                        b"version" => {
                            pkg.epoch = attribute(&e, b"epoch");
                            pkg.ver = attribute(&e, b"ver");
                            pkg.rel = attribute(&e, b"rel");
                        }
                        b"location" => pkg.location = attribute(&e, b"href"),
                        b"entry" => pkg.add_entry(section, &e),
                        _ => {}
                    }
                }
                Ok(Event::Text(e)) => {
                    if let Some(pkg) = current.as_mut() {
                        let text = e.unescape().unwrap_or_default().to_string();
                        match current_tag.as_slice() {
                            b"name" => pkg.name = Some(text),
                            b"arch" => pkg.arch = Some(text),
                            b"summary" => pkg.summary = Some(text),
                            b"checksum" => pkg.checksum = Some(text),
                            b"file" => pkg.files.push(text),
                            _ => {}
                        }
                    }
                }
                Ok(Event::End(e)) => {
                    match e.local_name().as_ref() {
                        b"package" => {
                            if let Some(builder) = current.take() {
                                match builder.build(base_url) {
                                    Ok(pkg) => packages.push(pkg),
                                    Err(e) => {
                                        skipped += 1;
                                        warn!("Skipping package record: {}", e);
                                    }
                                }
                            }
                        }
                        other if Section::from_tag(other).is_some() => section = Section::None,
                        _ => {}
                    }
                    current_tag.clear();
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(Error::ParseError(format!(
                        "Failed to parse primary.xml: {}",
                        e
                    )));
                }
                _ => {}
            }
            buf.clear();
        }

        debug!(
            "Parsed {} packages from primary metadata ({} skipped)",
            packages.len(),
            skipped
        );
        Ok(packages)
    }
}

/// Which relation list `<rpm:entry>` elements currently belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Provides,
    Requires,
    Conflicts,
    Obsoletes,
    /// recommends / suggests: recorded but never enforced
    Weak,
    /// supplements / enhances: reverse relations, ignored
    Reverse,
}

impl Section {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"provides" => Some(Section::Provides),
            b"requires" => Some(Section::Requires),
            b"conflicts" => Some(Section::Conflicts),
            b"obsoletes" => Some(Section::Obsoletes),
            b"recommends" | b"suggests" => Some(Section::Weak),
            b"supplements" | b"enhances" => Some(Section::Reverse),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct PackageBuilder {
    name: Option<String>,
    arch: Option<String>,
    epoch: Option<String>,
    ver: Option<String>,
    rel: Option<String>,
    summary: Option<String>,
    checksum: Option<String>,
    checksum_type: Option<String>,
    location: Option<String>,
    files: Vec<String>,
    provides: Vec<Capability>,
    requires: Vec<Dependency>,
    conflicts: Vec<Dependency>,
    obsoletes: Vec<Dependency>,
}

fn parse_epoch(epoch: Option<&str>) -> Result<u64> {
    match epoch {
        None | Some("") => Ok(0),
        Some(e) => e
            .parse()
            .map_err(|_| Error::ParseError(format!("Invalid epoch '{}'", e))),
    }
}

impl PackageBuilder {
    fn add_entry(&mut self, section: Section, e: &BytesStart<'_>) {
        let Some(name) = attribute(e, b"name") else {
            return;
        };

        let version = match (attribute(e, b"ver"), parse_epoch(attribute(e, b"epoch").as_deref())) {
            (Some(ver), Ok(epoch)) => Some(RpmVersion::new(epoch, ver, attribute(e, b"rel"))),
            (Some(ver), Err(_)) => {
                warn!("Ignoring bad epoch on {} {}", name, ver);
                None
            }
            (None, _) => None,
        };
        let op = attribute(e, b"flags").and_then(|f| Operator::from_rpm_flags(&f));

        if section == Section::Provides {
            self.provides.push(match version {
                Some(version) => Capability::versioned(name, version),
                None => Capability::new(name),
            });
            return;
        }

        // rpm's own feature markers are satisfied by the rpm binary
        if name.starts_with("rpmlib(") {
            return;
        }
        let dep = match (op, version) {
            (Some(op), Some(version)) => Dependency::versioned(name, op, version),
            _ => Dependency::new(name),
        };
        match section {
            Section::Requires => self.requires.push(dep),
            Section::Weak => self.requires.push(dep.into_optional()),
            Section::Conflicts => self.conflicts.push(dep),
            Section::Obsoletes => self.obsoletes.push(dep),
            Section::Provides | Section::Reverse | Section::None => {}
        }
    }

    fn build(self, base_url: &str) -> Result<Package> {
        let name = self
            .name
            .ok_or_else(|| Error::ParseError("Missing package name".to_string()))?;
        let ver = self
            .ver
            .ok_or_else(|| Error::ParseError(format!("Missing version for {}", name)))?;
        let epoch = parse_epoch(self.epoch.as_deref())?;
        let release = self.rel.filter(|r| !r.is_empty());
        let arch = self.arch.unwrap_or_else(|| "noarch".to_string());
        let location = self
            .location
            .ok_or_else(|| Error::ParseError(format!("Missing location for {}", name)))?;

        let mut pkg = Package::new(name, RpmVersion::new(epoch, ver, release), arch);
        pkg.location = format!("{}/{}", base_url.trim_end_matches('/'), location);
        pkg.summary = self.summary.unwrap_or_default();
        pkg.checksum = match self.checksum_type.as_deref() {
            Some("sha256") => self.checksum,
            _ => None,
        };
        pkg.provides = self.provides;
        pkg.provides
            .extend(self.files.into_iter().map(Capability::new));
        pkg.requires = self.requires;
        pkg.conflicts = self.conflicts;
        pkg.obsoletes = self.obsoletes;
        Ok(pkg)
    }
}
