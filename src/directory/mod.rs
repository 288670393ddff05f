//! Directory Module - Avatar-Kontakte

mod contacts;

pub use contacts::{Contact, ContactDirectory, DirectoryError, SelectionStep};
