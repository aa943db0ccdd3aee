//! Command registry
//!
//! Commands are `'static` descriptors declared by the module that owns
//! them. Each module contributes its tables through a `register` function
//! and the [`RegistryBuilder`] lays them out in a fixed section order:
//!
//! 1. anytime commands
//! 2. application launchers
//! 3. idle-time commands
//! 4. service commands
//! 5. application submode tables
//!
//! The first four sections get a delimiter entry in front so `HELP` can
//! print section titles. Submode tables carry their own delimiter as their
//! first entry; the end of the slice ends the table.
//!
//! Lookup is linear and the first match wins, so the registration order
//! also decides which descriptor a duplicated name resolves to.

use std::fmt;

use crate::app::AppDescriptor;
use crate::context::SystemContext;
use crate::error::CtlError;

/// When a command may run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// In every application
    Anytime,
    /// Only while the idle application is current
    IdleOnly,
    /// Only from the submode table of the running application
    AppOwned,
}

/// What kind of registry entry this is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandGroup {
    /// Section title, no handler
    Delimiter,
    /// Ordinary command
    Command,
    /// Starts an application
    Application,
}

/// Arguments handed to a command handler
#[derive(Debug, Clone, Copy)]
pub struct CommandArgs<'a> {
    /// The whole uppercased token, command name included
    pub text: &'a str,
    /// Leading integer of the first argument, 0 if absent
    pub val: i32,
    /// `PARAMS` object of a JSON command
    pub params: Option<&'a serde_json::Value>,
}

impl<'a> CommandArgs<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            val: 0,
            params: None,
        }
    }

    /// Whitespace-separated words after the command name
    pub fn words(&self) -> impl Iterator<Item = &'a str> {
        self.text.split_whitespace().skip(1)
    }

    /// Number of argument words
    pub fn argc(&self) -> usize {
        self.words().count()
    }
}

/// Command handler
///
/// Returns the text to reply with. An error makes the dispatcher answer
/// with the generic function error instead.
pub type CommandHandler = fn(&CommandArgs<'_>, &mut SystemContext) -> Result<String, CtlError>;

/// One registry entry
pub struct CommandDescriptor {
    /// `None` for section delimiters
    pub name: Option<&'static str>,
    pub permission: Permission,
    pub group: CommandGroup,
    pub handler: Option<CommandHandler>,
    /// Help text, or the section title for delimiters
    pub help: &'static str,
}

impl CommandDescriptor {
    pub const fn command(
        name: &'static str,
        permission: Permission,
        handler: CommandHandler,
        help: &'static str,
    ) -> Self {
        Self {
            name: Some(name),
            permission,
            group: CommandGroup::Command,
            handler: Some(handler),
            help,
        }
    }

    /// An idle-only command that starts an application
    pub const fn launcher(name: &'static str, handler: CommandHandler, help: &'static str) -> Self {
        Self {
            name: Some(name),
            permission: Permission::IdleOnly,
            group: CommandGroup::Application,
            handler: Some(handler),
            help,
        }
    }

    pub const fn delimiter(permission: Permission, title: &'static str) -> Self {
        Self {
            name: None,
            permission,
            group: CommandGroup::Delimiter,
            handler: None,
            help: title,
        }
    }

    pub fn is_delimiter(&self) -> bool {
        self.group == CommandGroup::Delimiter
    }
}

impl fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("name", &self.name)
            .field("permission", &self.permission)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

/// Registry sections, in layout order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Anytime,
    Launchers,
    Idle,
    Service,
    Submodes,
}

static ANYTIME_HEADER: CommandDescriptor =
    CommandDescriptor::delimiter(Permission::Anytime, "Anytime commands -----");
static LAUNCHERS_HEADER: CommandDescriptor =
    CommandDescriptor::delimiter(Permission::IdleOnly, "Application selection ");
static IDLE_HEADER: CommandDescriptor =
    CommandDescriptor::delimiter(Permission::IdleOnly, "IDLE time commands --");
static SERVICE_HEADER: CommandDescriptor =
    CommandDescriptor::delimiter(Permission::IdleOnly, "Service commands -----");

impl Section {
    const ORDER: [Section; 5] = [
        Section::Anytime,
        Section::Launchers,
        Section::Idle,
        Section::Service,
        Section::Submodes,
    ];

    fn header(&self) -> Option<&'static CommandDescriptor> {
        match self {
            Section::Anytime => Some(&ANYTIME_HEADER),
            Section::Launchers => Some(&LAUNCHERS_HEADER),
            Section::Idle => Some(&IDLE_HEADER),
            Section::Service => Some(&SERVICE_HEADER),
            Section::Submodes => None,
        }
    }

    fn index(&self) -> usize {
        match self {
            Section::Anytime => 0,
            Section::Launchers => 1,
            Section::Idle => 2,
            Section::Service => 3,
            Section::Submodes => 4,
        }
    }
}

/// Collects command tables and applications before the registry is frozen
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    sections: [Vec<&'static CommandDescriptor>; 5],
    apps: Vec<&'static AppDescriptor>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command table to a section
    pub fn add(&mut self, section: Section, table: &'static [CommandDescriptor]) -> &mut Self {
        self.sections[section.index()].extend(table.iter());
        self
    }

    /// Make an application selectable by name
    pub fn add_app(&mut self, app: &'static AppDescriptor) -> &mut Self {
        if !self.apps.iter().any(|a| std::ptr::eq(*a, app)) {
            self.apps.push(app);
        }
        self
    }

    pub fn build(self) -> Registry {
        let mut entries = Vec::new();
        for section in Section::ORDER {
            let table = &self.sections[section.index()];
            if table.is_empty() {
                continue;
            }
            if let Some(header) = section.header() {
                entries.push(header);
            }
            entries.extend(table.iter().copied());
        }
        Registry {
            entries,
            apps: self.apps,
        }
    }
}

/// Frozen, ordered command table
#[derive(Debug, Clone)]
pub struct Registry {
    entries: Vec<&'static CommandDescriptor>,
    apps: Vec<&'static AppDescriptor>,
}

impl Registry {
    /// Registry with every built-in command and application
    pub fn standard() -> Self {
        let mut builder = RegistryBuilder::new();
        crate::commands::register(&mut builder);
        crate::apps::register(&mut builder);
        builder.build()
    }

    /// First descriptor with this name
    pub fn lookup(&self, name: &str) -> Option<&'static CommandDescriptor> {
        self.entries.iter().copied().find(|d| d.name == Some(name))
    }

    /// Every entry, delimiters included, in layout order
    pub fn iter(&self) -> impl Iterator<Item = &'static CommandDescriptor> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Application with this name
    pub fn app(&self, name: &str) -> Option<&'static AppDescriptor> {
        self.apps.iter().copied().find(|a| a.name == name)
    }

    pub fn apps(&self) -> &[&'static AppDescriptor] {
        &self.apps
    }

    /// Names of the application launcher commands
    pub fn launchers(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries
            .iter()
            .filter(|d| d.group == CommandGroup::Application)
            .filter_map(|d| d.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &CommandArgs<'_>, _: &mut SystemContext) -> Result<String, CtlError> {
        Ok(String::new())
    }

    static FIRST: [CommandDescriptor; 2] = [
        CommandDescriptor::command("ALPHA", Permission::Anytime, noop, "first alpha"),
        CommandDescriptor::command("BETA", Permission::Anytime, noop, ""),
    ];

    static SECOND: [CommandDescriptor; 1] =
        [CommandDescriptor::command("ALPHA", Permission::IdleOnly, noop, "second alpha")];

    static SUBMODES: [CommandDescriptor; 2] = [
        CommandDescriptor::delimiter(Permission::AppOwned, "TEST Options -----"),
        CommandDescriptor::command("GAMMA", Permission::AppOwned, noop, ""),
    ];

    static LAUNCH: [CommandDescriptor; 1] = [CommandDescriptor::launcher("GO", noop, "")];

    #[test]
    fn test_sections_are_laid_out_in_order() {
        let mut builder = RegistryBuilder::new();
        builder
            .add(Section::Submodes, &SUBMODES)
            .add(Section::Idle, &SECOND)
            .add(Section::Launchers, &LAUNCH)
            .add(Section::Anytime, &FIRST);
        let registry = builder.build();

        let layout: Vec<_> = registry.iter().map(|d| d.name.unwrap_or(d.help)).collect();
        assert_eq!(
            layout,
            vec![
                "Anytime commands -----",
                "ALPHA",
                "BETA",
                "Application selection ",
                "GO",
                "IDLE time commands --",
                "ALPHA",
                "TEST Options -----",
                "GAMMA",
            ]
        );
    }

    #[test]
    fn test_first_match_wins() {
        let mut builder = RegistryBuilder::new();
        builder.add(Section::Idle, &SECOND).add(Section::Anytime, &FIRST);
        let registry = builder.build();
        let found = registry.lookup("ALPHA").unwrap();
        assert_eq!(found.help, "first alpha");
        assert!(std::ptr::eq(found, &FIRST[0]));
        assert!(registry.lookup("alpha").is_none());
        assert!(registry.lookup("DELTA").is_none());
    }

    #[test]
    fn test_launchers_listed() {
        let mut builder = RegistryBuilder::new();
        builder.add(Section::Launchers, &LAUNCH).add(Section::Anytime, &FIRST);
        let registry = builder.build();
        assert_eq!(registry.launchers().collect::<Vec<_>>(), vec!["GO"]);
    }

    #[test]
    fn test_args_words() {
        let args = CommandArgs::new("TCFM 10  5 40");
        assert_eq!(args.words().collect::<Vec<_>>(), vec!["10", "5", "40"]);
        assert_eq!(args.argc(), 3);
        assert_eq!(CommandArgs::new("STAT").argc(), 0);
    }

    #[test]
    fn test_standard_registry_has_builtins() {
        let registry = Registry::standard();
        for name in ["HELP", "?", "STOP", "STAT", "SAVE", "DECA$", "LISTENER2", "TCFM", "UCI", "LSTAT", "PAVRG"] {
            assert!(registry.lookup(name).is_some(), "missing {}", name);
        }
        for app in ["STOP", "LISTENER", "TCFM", "TCWM", "INITF", "RESPF", "UCI"] {
            assert!(registry.app(app).is_some(), "missing app {}", app);
        }
    }
}
