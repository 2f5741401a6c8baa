// SPDX-License-Identifier: GPL-3.0-only
/*
 * Copyright (c) 2025 Code Construct
 */
use deku::{
    DekuError, DekuReader, DekuWriter,
    ctx::Limit,
    deku_error,
    no_std_io::{self},
    reader::Reader,
    writer::Writer,
};

/// A bounded vector read element-by-element from the wire.
///
/// Used for count-prefixed structures such as the Controller List, where
/// the element count arrives in a preceding field.
#[derive(Debug)]
pub struct WireVec<T, const S: usize>(heapless::Vec<T, S>);

impl<T, const S: usize> WireVec<T, S> {
    pub fn new() -> Self {
        Self(heapless::Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.0
    }

    pub fn push(&mut self, item: T) -> Result<(), T> {
        self.0.push(item)
    }
}

impl<'a, T, Ctx, Predicate, const S: usize> DekuReader<'a, (Limit<T, Predicate>, Ctx)>
    for WireVec<T, S>
where
    T: DekuReader<'a, Ctx>,
    Ctx: Copy,
    Predicate: FnMut(&T) -> bool,
{
    fn from_reader_with_ctx<R: no_std_io::Read + no_std_io::Seek>(
        reader: &mut Reader<R>,
        (limit, inner_ctx): (Limit<T, Predicate>, Ctx),
    ) -> Result<Self, DekuError>
    where
        Self: Sized,
    {
        let Limit::Count(count) = limit else {
            todo!()
        };

        if count > S {
            return Err(deku_error!(
                DekuError::InvalidParam,
                "Count is larger than vector capacity",
                "{} exceeds {}",
                count,
                S
            ));
        }

        let mut res = WireVec::new();
        for _ in 0..count {
            let val = <T>::from_reader_with_ctx(reader, inner_ctx)?;
            if res.push(val).is_err() {
                return Err(deku_error!(
                    DekuError::InvalidParam,
                    "Failed to insert item into WireVec"
                ));
            }
        }

        Ok(res)
    }
}

impl<T: DekuWriter<Ctx>, Ctx: Copy, const S: usize> DekuWriter<Ctx> for WireVec<T, S> {
    fn to_writer<W: no_std_io::Write + no_std_io::Seek>(
        &self,
        writer: &mut Writer<W>,
        inner_ctx: Ctx,
    ) -> Result<(), DekuError> {
        for v in &self.0 {
            v.to_writer(writer, inner_ctx)?;
        }
        Ok(())
    }
}
