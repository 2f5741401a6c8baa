// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */

use deku::{DekuError, DekuReader, DekuWriter, deku_error, reader::Reader, writer::Writer};
use flagset::{FlagSet, Flags};

/// A `FlagSet` carried as its underlying integer on the wire.
///
/// Decoding rejects values with bits outside the flag definition.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WireFlagSet<T: Flags>(pub FlagSet<T>);

impl<T: Flags> From<FlagSet<T>> for WireFlagSet<T> {
    fn from(value: FlagSet<T>) -> Self {
        Self(value)
    }
}

impl<T: Flags> Default for WireFlagSet<T> {
    fn default() -> Self {
        Self(FlagSet::empty())
    }
}

impl<'a, Ctx, T> DekuReader<'a, Ctx> for WireFlagSet<T>
where
    T: Flags,
    <T as Flags>::Type: DekuReader<'a, Ctx>,
{
    fn from_reader_with_ctx<R: deku::no_std_io::Read + deku::no_std_io::Seek>(
        reader: &mut Reader<R>,
        ctx: Ctx,
    ) -> Result<Self, DekuError>
    where
        Self: Sized,
    {
        let val = <<T as Flags>::Type>::from_reader_with_ctx(reader, ctx)?;
        let fs = FlagSet::new(val)
            .map_err(|_| deku_error!(DekuError::Parse, "Found invalid flag set", "{}", val))?;
        Ok(WireFlagSet(fs))
    }
}

impl<Ctx, T> DekuWriter<Ctx> for WireFlagSet<T>
where
    T: Flags,
    <T as Flags>::Type: DekuWriter<Ctx>,
{
    fn to_writer<W: deku::no_std_io::Write + deku::no_std_io::Seek>(
        &self,
        writer: &mut Writer<W>,
        ctx: Ctx,
    ) -> Result<(), DekuError> {
        self.0.bits().to_writer(writer, ctx)
    }
}
