// 配置页存储：编译进二进制或者从磁盘目录读取
pub mod provider_disk;
pub mod provider_embed;
