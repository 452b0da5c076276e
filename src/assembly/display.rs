//! Textual rendering of method bodies.
//!
//! The output resembles an ildasm listing: locals first, then one line per instruction prefixed
//! with its position, then the exception regions. Branch targets are printed as the label and
//! the position it currently resolves to.
//!
//! ```text
//! .locals (int32 retVal)
//! IL_0000: ldarg A_1
//! IL_0001: brfalse L0 -> IL_0003
//! IL_0002: ...
//! ```

use std::fmt;

use crate::assembly::{
    body::MethodBody,
    instruction::{InstrId, Operand},
};

impl MethodBody {
    fn line_of(&self, id: InstrId) -> String {
        match self.position(id) {
            Some(index) => format!("IL_{index:04}"),
            None => format!("?{id}"),
        }
    }

    /// Renders the body as a listing.
    #[must_use]
    pub fn dump(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.locals.is_empty() {
            write!(f, ".locals (")?;
            for (index, local) in self.locals.iter().enumerate() {
                if index > 0 {
                    write!(f, ", ")?;
                }
                if local.name.is_empty() {
                    write!(f, "{} V_{}", local.ty, index)?;
                } else {
                    write!(f, "{} {}", local.ty, local.name)?;
                }
            }
            writeln!(f, ")")?;
        }

        for (index, instr) in self.instructions.iter().enumerate() {
            write!(f, "IL_{index:04}: {instr}")?;
            if let Operand::Label(label) = instr.operand {
                match self.label_target(label) {
                    Some(target) => write!(f, " -> {}", self.line_of(target))?,
                    None => write!(f, " -> <unmarked>")?,
                }
            }
            writeln!(f)?;
        }

        for handler in &self.exception_handlers {
            write!(
                f,
                ".try {} to {} ",
                self.line_of(handler.try_start),
                self.line_of(handler.try_end)
            )?;
            if handler.is_finally() {
                write!(f, "finally")?;
            } else if handler.is_fault() {
                write!(f, "fault")?;
            } else {
                write!(
                    f,
                    "catch {}",
                    handler.catch_type.as_deref().unwrap_or("*")
                )?;
            }
            writeln!(
                f,
                " handler {} to {}",
                self.line_of(handler.handler_start),
                self.line_of(handler.handler_end)
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{assembly::builder::MethodBodyBuilder, metadata::method::TypeSig};

    #[test]
    fn test_listing() {
        let body = MethodBodyBuilder::new()
            .local("x", TypeSig::I32)
            .implementation(|asm| {
                asm.label("try")?
                    .ldarg(0)?
                    .brtrue("catch")?
                    .leave("end")?
                    .label("catch")?
                    .pop()?
                    .leave("end")?
                    .label("end")?
                    .ret()?;
                Ok(())
            })
            .catch_handler("try", "catch", "end", None)
            .build()
            .unwrap();

        let listing = body.dump();
        assert!(listing.starts_with(".locals (int32 x)\n"));
        assert!(listing.contains("IL_0001: brtrue L1 -> IL_0003\n"));
        assert!(listing.contains("IL_0005: ret\n"));
        assert!(listing.contains(".try IL_0000 to IL_0003 catch * handler IL_0003 to IL_0005"));
    }
}
