/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Bytecode artifact: a parsed script serialized behind a small magic +
//! version header. The format is private; the only promise is that
//! parse + compile + execute stay internally consistent, so a version
//! bump invalidates old blobs instead of migrating them.

use serde::{Deserialize, Serialize};

use crate::{
    script::{ast::Command, Script},
    ErrorKind,
};

const MAGIC: &[u8; 4] = b"SIVC";
const VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Program {
    pub support: u64,
    pub commands: Vec<Command>,
}

impl Script {
    /// Serializes the command tree into a memory-mappable blob.
    pub fn to_bytecode(&self) -> Result<Vec<u8>, ErrorKind> {
        let program = Program {
            support: self.support,
            commands: self.commands.clone(),
        };
        let body = bincode::serialize(&program).map_err(|_| ErrorKind::NoMem)?;
        let mut blob = Vec::with_capacity(MAGIC.len() + 4 + body.len());
        blob.extend_from_slice(MAGIC);
        blob.extend_from_slice(&VERSION.to_le_bytes());
        blob.extend_from_slice(&body);
        Ok(blob)
    }

    /// Writes the blob to the file the bytecode cache later maps.
    pub fn emit(&self, writer: &mut impl std::io::Write) -> Result<(), ErrorKind> {
        let blob = self.to_bytecode()?;
        writer.write_all(&blob).map_err(|_| ErrorKind::Generic)
    }
}

/// Decodes a mapped blob back into an executable program.
pub(crate) fn from_bytecode(blob: &[u8]) -> Result<Program, ErrorKind> {
    let body = blob
        .strip_prefix(MAGIC.as_slice())
        .ok_or(ErrorKind::Run)?;
    if body.len() < 4 {
        return Err(ErrorKind::Run);
    }
    let (version, body) = body.split_at(4);
    if u32::from_le_bytes(version.try_into().map_err(|_| ErrorKind::Run)?) != VERSION {
        return Err(ErrorKind::Run);
    }
    bincode::deserialize(body).map_err(|_| ErrorKind::Run)
}
