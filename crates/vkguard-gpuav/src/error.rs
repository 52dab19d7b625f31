use ash::vk;

#[derive(Debug, thiserror::Error)]
pub enum SpirvError {
    #[error("binary is shorter than the 5-word header")]
    MissingHeader,

    #[error("bad magic number 0x{0:08x}")]
    WrongMagic(u32),

    #[error("byte length {0} is not a multiple of 4")]
    Misaligned(usize),

    #[error("instruction at word {offset} claims {word_count} words but only {remaining} remain")]
    IncompleteInstruction {
        offset: usize,
        word_count: usize,
        remaining: usize,
    },

    #[error("instruction at word {0} has a word count of zero")]
    ZeroWordCount(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum InstrumentError {
    #[error(transparent)]
    Spirv(#[from] SpirvError),

    #[error("module declares no entry point")]
    NoEntryPoint,

    #[error("id bound exhausted")]
    IdOverflow,
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("descriptor pool creation failed: {0}")]
    CreatePool(vk::Result),

    #[error("descriptor set allocation failed: {0}")]
    AllocateSets(vk::Result),

    #[error("descriptor pool {0:?} is not managed here")]
    UnknownPool(vk::DescriptorPool),

    #[error("requested zero descriptor sets")]
    EmptyRequest,
}

#[derive(Debug, thiserror::Error)]
pub enum AllocError {
    #[error("buffer creation failed: {0}")]
    CreateBuffer(vk::Result),

    #[error("no memory type satisfies the request")]
    NoMemoryType,

    #[error("memory allocation failed: {0}")]
    AllocateMemory(vk::Result),

    #[error("binding memory failed: {0}")]
    Bind(vk::Result),

    #[error("mapping memory failed: {0}")]
    Map(vk::Result),
}

/// Failures that put the GPU-assisted unit into the aborted state.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("device exposes {limit} descriptor set slot(s); at least 2 are required")]
    BindingSlotsExhausted { limit: u32 },

    #[error("{what} creation failed: {result}")]
    ObjectCreation { what: &'static str, result: vk::Result },

    #[error("required device feature {0} is not supported")]
    MissingFeature(&'static str),

    #[error(transparent)]
    Alloc(#[from] AllocError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}
