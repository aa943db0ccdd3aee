//! Built-in applications
//!
//! Each module declares its [`AppDescriptor`](crate::app::AppDescriptor),
//! the launcher command that selects it and, where it has one, its
//! submode table.

pub mod fira;
pub mod idle;
pub mod listener;
pub mod tcfm;
pub mod tcwm;
pub mod uci;

use crate::registry::{RegistryBuilder, Section};

/// Add every application, its launcher and its submode table
pub fn register(builder: &mut RegistryBuilder) {
    builder
        .add(Section::Launchers, &listener::LAUNCHERS)
        .add(Section::Launchers, &tcfm::LAUNCHERS)
        .add(Section::Launchers, &tcwm::LAUNCHERS)
        .add(Section::Launchers, &fira::LAUNCHERS)
        .add(Section::Launchers, &uci::LAUNCHERS)
        .add(Section::Submodes, &listener::LISTENER_SUBMODES)
        .add(Section::Submodes, &fira::FIRA_SUBMODES);

    builder
        .add_app(&idle::IDLE_APP)
        .add_app(&listener::LISTENER_APP)
        .add_app(&tcfm::TCFM_APP)
        .add_app(&tcwm::TCWM_APP)
        .add_app(&fira::INITF_APP)
        .add_app(&fira::RESPF_APP)
        .add_app(&uci::UCI_APP);
}
