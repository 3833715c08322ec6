// Wire types for the Fatture in Cloud API

pub mod fic;
