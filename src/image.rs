// This module wraps compiled code in a loadable executable image. The container is a PE32+
// (x86-64 Windows) image produced with the object crate's PE writer: DOS header and stub, NT
// headers with the full set of sixteen (empty) data directories, and a single .text section
// holding the encoder's bytes verbatim. The entry point is the .text RVA plus the entry
// function's offset in the code blob. The code is self-contained (rel32 calls only, no imports
// and no relocations), so the image is not marked relocatable and needs no import or base
// relocation tables. The timestamp field is zero, so identical code gives identical files.

//! Executable image writer.

use crate::compiler::CompiledModule;
use crate::core::error::{CompileError, CompileResult};
use object::pe;
use object::write::pe::{NtHeaders, Writer};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Number of optional-header data directories in a standard PE32+ image.
const DATA_DIRECTORIES: usize = pe::IMAGE_NUMBEROF_DIRECTORY_ENTRIES;

/// Image layout and loader parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageConfig {
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub subsystem: u16,
    pub stack_reserve: u64,
    pub stack_commit: u64,
    pub heap_reserve: u64,
    pub heap_commit: u64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            image_base: 0x1_4000_0000,
            section_alignment: 0x1000,
            file_alignment: 0x200,
            subsystem: pe::IMAGE_SUBSYSTEM_WINDOWS_CUI,
            stack_reserve: 0x10_0000,
            stack_commit: 0x1000,
            heap_reserve: 0x10_0000,
            heap_commit: 0x1000,
        }
    }
}

impl ImageConfig {
    /// Check the alignment rules a loader enforces.
    pub fn validate(&self) -> CompileResult<()> {
        if !self.file_alignment.is_power_of_two() || !(0x200..=0x1_0000).contains(&self.file_alignment) {
            return Err(image_error(format!(
                "file alignment {:#x} must be a power of two between 0x200 and 0x10000",
                self.file_alignment
            )));
        }
        if !self.section_alignment.is_power_of_two() || self.section_alignment < self.file_alignment {
            return Err(image_error(format!(
                "section alignment {:#x} must be a power of two no smaller than the file alignment",
                self.section_alignment
            )));
        }
        if self.image_base % 0x1_0000 != 0 {
            return Err(image_error(format!(
                "image base {:#x} must be 64K aligned",
                self.image_base
            )));
        }
        Ok(())
    }
}

fn image_error(reason: impl Into<String>) -> CompileError {
    CompileError::Image {
        reason: reason.into(),
    }
}

/// Build an image around raw code whose entry point is `entry_offset` bytes in.
pub fn build_image_from_code(
    code: &[u8],
    entry_offset: usize,
    config: &ImageConfig,
) -> CompileResult<Vec<u8>> {
    config.validate()?;
    if code.is_empty() {
        return Err(image_error("no code to write"));
    }
    if entry_offset >= code.len() {
        return Err(image_error(format!(
            "entry offset {entry_offset:#x} is outside {} bytes of code",
            code.len()
        )));
    }
    let code_len =
        u32::try_from(code.len()).map_err(|_| image_error("code does not fit in one section"))?;

    let mut buffer = Vec::new();
    let mut writer = Writer::new(
        true,
        config.section_alignment,
        config.file_alignment,
        &mut buffer,
    );

    // Reserve file ranges
    writer.reserve_dos_header_and_stub();
    writer.reserve_nt_headers(DATA_DIRECTORIES);
    writer.reserve_section_headers(1);
    let text = writer.reserve_text_section(code_len);

    let entry = text.virtual_address + entry_offset as u32;
    log::debug!(
        ".text at rva {:#x}, {} bytes, entry rva {:#x}",
        text.virtual_address,
        code_len,
        entry
    );

    // Write file contents
    writer
        .write_dos_header_and_stub()
        .map_err(|e| image_error(e.to_string()))?;
    writer.write_nt_headers(NtHeaders {
        machine: pe::IMAGE_FILE_MACHINE_AMD64,
        time_date_stamp: 0,
        characteristics: pe::IMAGE_FILE_EXECUTABLE_IMAGE | pe::IMAGE_FILE_LARGE_ADDRESS_AWARE,
        major_linker_version: 0,
        minor_linker_version: 0,
        address_of_entry_point: entry,
        image_base: config.image_base,
        major_operating_system_version: 6,
        minor_operating_system_version: 0,
        major_image_version: 0,
        minor_image_version: 0,
        major_subsystem_version: 6,
        minor_subsystem_version: 0,
        subsystem: config.subsystem,
        dll_characteristics: pe::IMAGE_DLLCHARACTERISTICS_NX_COMPAT
            | pe::IMAGE_DLLCHARACTERISTICS_TERMINAL_SERVER_AWARE,
        size_of_stack_reserve: config.stack_reserve,
        size_of_stack_commit: config.stack_commit,
        size_of_heap_reserve: config.heap_reserve,
        size_of_heap_commit: config.heap_commit,
    });
    writer.write_section_headers();
    writer.write_section(text.file_offset, code);

    log::debug!("executable image is {} bytes", buffer.len());
    Ok(buffer)
}

/// Build an image for `module` that starts executing at function `entry`.
pub fn build_image(
    module: &CompiledModule<'_>,
    entry: &str,
    config: &ImageConfig,
) -> CompileResult<Vec<u8>> {
    let entry_offset = module.function_offset(entry)?;
    build_image_from_code(module.code, entry_offset, config)
}

/// Write the image for `module` to `out`.
pub fn write_executable<W: Write>(
    out: &mut W,
    module: &CompiledModule<'_>,
    entry: &str,
    config: &ImageConfig,
) -> CompileResult<()> {
    let image = build_image(module, entry, config)?;
    out.write_all(&image)?;
    out.flush()?;
    Ok(())
}

/// Create `path` and write the image for `module` into it.
pub fn write_executable_file(
    path: impl AsRef<Path>,
    module: &CompiledModule<'_>,
    entry: &str,
    config: &ImageConfig,
) -> CompileResult<()> {
    let path = path.as_ref();
    // The file is only created once the image is complete.
    let image = build_image(module, entry, config)?;
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(&image)?;
    out.flush()?;
    log::info!("wrote {} ({} bytes)", path.display(), image.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use object::{Architecture, BinaryFormat, Object, ObjectSection};

    #[test]
    fn image_holds_code_verbatim() {
        let code = [0x48, 0x81, 0xEC, 4, 0, 0, 0, 0xC3];
        let image = build_image_from_code(&code, 0, &ImageConfig::default()).unwrap();

        assert_eq!(&image[..2], b"MZ");
        let file = object::File::parse(&*image).unwrap();
        assert_eq!(file.format(), BinaryFormat::Pe);
        assert_eq!(file.architecture(), Architecture::X86_64);

        let text = file.section_by_name(".text").unwrap();
        assert_eq!(&text.data().unwrap()[..code.len()], &code);
        assert_eq!(file.entry(), text.address());
    }

    #[test]
    fn entry_must_point_into_code() {
        let err = build_image_from_code(&[0xC3], 1, &ImageConfig::default()).unwrap_err();
        assert!(matches!(err, CompileError::Image { .. }));
        let err = build_image_from_code(&[], 0, &ImageConfig::default()).unwrap_err();
        assert!(matches!(err, CompileError::Image { .. }));
    }

    #[test]
    fn config_is_validated() {
        let config = ImageConfig {
            file_alignment: 0x300,
            ..ImageConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ImageConfig {
            section_alignment: 0x100,
            ..ImageConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(ImageConfig::default().validate().is_ok());
    }

    #[test]
    fn output_is_deterministic() {
        let code = [0x55, 0x48, 0x89, 0xE5, 0x5D, 0xC3];
        let a = build_image_from_code(&code, 0, &ImageConfig::default()).unwrap();
        let b = build_image_from_code(&code, 0, &ImageConfig::default()).unwrap();
        assert_eq!(a, b);
    }
}
