//! Mule Buildpack CLI - buildpack lifecycle entrypoints.

pub mod commands;
