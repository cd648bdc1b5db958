//! Separate debug file discovery.
//!
//! Follows the GDB search order for `.gnu_debuglink` targets, the build-id
//! tree under the debug root, and `.dSYM` bundles next to Mach-O modules.

use std::path::{Path, PathBuf};

use object::{FileKind, Object};
use tracing::{debug, trace, warn};

use super::image::ImageSource;
use super::macho::select_fat_slice;
use super::DebugLink;

/// Candidate paths for a module's separate debug file.
pub(crate) struct DebugLinkResolver<'a>
{
    source: &'a dyn ImageSource,
    debug_root: &'a Path,
}

impl<'a> DebugLinkResolver<'a>
{
    pub(crate) fn new(source: &'a dyn ImageSource, debug_root: &'a Path) -> Self
    {
        Self { source, debug_root }
    }

    /// First existing debug file for `module`, or `None` to make do with the
    /// module itself.
    pub(crate) fn resolve(&self, module: &Path, link: Option<&DebugLink>, build_id: Option<&str>) -> Option<PathBuf>
    {
        let found = match link {
            Some(DebugLink::Name(name)) => self.resolve_name(module, name, build_id),
            Some(DebugLink::Dsym { uuid }) => self.resolve_dsym(module, uuid),
            None => build_id.and_then(|id| self.build_id_file(module, id)),
        };
        match &found {
            Some(path) => debug!(module = %module.display(), debug_file = %path.display(), "found separate debug file"),
            None => trace!(module = %module.display(), "no separate debug file"),
        }
        found
    }

    fn accept(&self, module: &Path, candidate: &Path) -> bool
    {
        trace!(candidate = %candidate.display(), "looking for debug file");
        self.source.exists(candidate) && !self.source.same_file(module, candidate)
    }

    fn resolve_name(&self, module: &Path, name: &str, build_id: Option<&str>) -> Option<PathBuf>
    {
        let link = Path::new(name);
        if link.is_absolute() && self.accept(module, link) {
            return Some(link.to_path_buf());
        }
        let relative = link.strip_prefix("/").unwrap_or(link);
        let mod_dir = module.parent().unwrap_or_else(|| Path::new(""));

        if let Some(id) = build_id {
            if let Some(head) = id.get(..2) {
                let candidate = self.debug_root.join(".build-id").join(head).join(relative);
                if self.accept(module, &candidate) {
                    return Some(candidate);
                }
            }
            if let Some(path) = self.build_id_file(module, id) {
                return Some(path);
            }
        }

        let candidates = [
            mod_dir.join(relative),
            mod_dir.join(".debug").join(relative),
            self.debug_root.join(mod_dir.strip_prefix("/").unwrap_or(mod_dir)).join(relative),
        ];
        candidates.into_iter().find(|candidate| self.accept(module, candidate))
    }

    /// `<root>/.build-id/xx/<rest>.debug`.
    fn build_id_file(&self, module: &Path, id: &str) -> Option<PathBuf>
    {
        if id.len() <= 2 || !id.is_char_boundary(2) {
            return None;
        }
        let (head, rest) = id.split_at(2);
        let candidate = self.debug_root.join(".build-id").join(head).join(format!("{rest}.debug"));
        self.accept(module, &candidate).then_some(candidate)
    }

    /// `<dir>/<name>.dSYM/Contents/Resources/DWARF/<name>`, accepted only when
    /// its `LC_UUID` matches the module's.
    fn resolve_dsym(&self, module: &Path, uuid: &[u8; 16]) -> Option<PathBuf>
    {
        let name = module.file_name()?;
        let mut bundle = name.to_os_string();
        bundle.push(".dSYM");
        let candidate = module
            .with_file_name(bundle)
            .join("Contents")
            .join("Resources")
            .join("DWARF")
            .join(name);
        if !self.accept(module, &candidate) {
            return None;
        }

        let image = match self.source.open(&candidate) {
            Ok(image) => image,
            Err(err) => {
                debug!(candidate = %candidate.display(), %err, "cannot open dSYM candidate");
                return None;
            }
        };
        if read_uuid(&image).as_ref() == Some(uuid) {
            Some(candidate)
        } else {
            warn!(candidate = %candidate.display(), "dSYM UUID does not match module, ignoring it");
            None
        }
    }
}

/// `LC_UUID` of a thin or universal Mach-O file.
pub(crate) fn read_uuid(data: &[u8]) -> Option<[u8; 16]>
{
    let kind = FileKind::parse(data).ok()?;
    let slice = match kind {
        FileKind::MachOFat32 | FileKind::MachOFat64 => select_fat_slice(data, kind).ok()?,
        _ => data,
    };
    object::File::parse(slice).ok()?.mach_uuid().ok()?
}
